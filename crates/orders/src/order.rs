use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bazaar_cart::{Cart, CartItem, Color, Quantity};
use bazaar_catalog::ProductId;
use bazaar_core::{
    Aggregate, AggregateId, AggregateRoot, DomainError, DomainResult, Event, Money, UserId,
    line_total, money,
};

use crate::payment::{Currency, PaymentIntent, PaymentMethod};

/// Order identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(pub AggregateId);

impl OrderId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for OrderId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl core::str::FromStr for OrderId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// Fulfilment status lifecycle.
///
/// `Pending` and `Not Processed` are the two entry states; the rest advance
/// monotonically. `Delivered` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    #[serde(rename = "Not Processed")]
    NotProcessed,
    Processing,
    Dispatched,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 6] = [
        OrderStatus::Pending,
        OrderStatus::NotProcessed,
        OrderStatus::Processing,
        OrderStatus::Dispatched,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "Pending",
            OrderStatus::NotProcessed => "Not Processed",
            OrderStatus::Processing => "Processing",
            OrderStatus::Dispatched => "Dispatched",
            OrderStatus::Delivered => "Delivered",
            OrderStatus::Cancelled => "Cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    fn rank(self) -> u8 {
        match self {
            OrderStatus::Pending | OrderStatus::NotProcessed => 0,
            OrderStatus::Processing => 1,
            OrderStatus::Dispatched => 2,
            OrderStatus::Delivered => 3,
            OrderStatus::Cancelled => u8::MAX,
        }
    }

    /// Forward moves only; `Cancelled` from any non-terminal status.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next == OrderStatus::Cancelled {
            return true;
        }
        next.rank() > self.rank()
    }
}

impl core::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for OrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| {
                DomainError::validation(format!(
                    "order status must be one of: {}",
                    Self::ALL.map(OrderStatus::as_str).join(", ")
                ))
            })
    }
}

/// Snapshot of one cart line at conversion time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: ProductId,
    pub title: String,
    pub slug: String,
    pub color: Color,
    pub quantity: Quantity,
    /// Price in smallest currency unit (e.g., cents).
    pub price: Money,
}

impl OrderItem {
    pub fn line_total(&self) -> DomainResult<Money> {
        line_total(self.price, self.quantity.get())
    }
}

impl From<&CartItem> for OrderItem {
    fn from(item: &CartItem) -> Self {
        Self {
            product_id: item.product_id,
            title: item.title.clone(),
            slug: item.slug.clone(),
            color: item.color.clone(),
            quantity: item.quantity,
            price: item.price,
        }
    }
}

/// Aggregate root: Order.
///
/// Immutable after placement except for status transitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    id: OrderId,
    ordered_by: Option<UserId>,
    items: Vec<OrderItem>,
    payment_intent: Option<PaymentIntent>,
    order_status: OrderStatus,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl Order {
    /// Create an empty, not-yet-placed aggregate instance.
    pub fn empty(id: OrderId) -> Self {
        Self {
            id,
            ordered_by: None,
            items: Vec::new(),
            payment_intent: None,
            order_status: OrderStatus::Pending,
            created_at: None,
            updated_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> OrderId {
        self.id
    }

    pub fn ordered_by(&self) -> Option<UserId> {
        self.ordered_by
    }

    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    pub fn payment_intent(&self) -> Option<&PaymentIntent> {
        self.payment_intent.as_ref()
    }

    pub fn order_status(&self) -> OrderStatus {
        self.order_status
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub fn is_placed(&self) -> bool {
        self.created
    }

    /// Amount captured in the payment intent (0 before placement).
    pub fn amount(&self) -> Money {
        self.payment_intent.as_ref().map_or(0, |p| p.amount)
    }
}

impl AggregateRoot for Order {
    type Id = OrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: PlaceOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOrder {
    pub order_id: OrderId,
    pub ordered_by: UserId,
    pub items: Vec<OrderItem>,
    /// Cart total at the instant of conversion.
    pub amount: Money,
    pub method: PaymentMethod,
    pub currency: Currency,
    pub payment_id: String,
    pub occurred_at: DateTime<Utc>,
}

impl PlaceOrder {
    /// Snapshot `cart` into a placement command.
    ///
    /// An unopened or empty cart has nothing to convert and is `NotFound`.
    pub fn from_cart(
        cart: &Cart,
        ordered_by: UserId,
        method: PaymentMethod,
        currency: Currency,
        order_id: OrderId,
        occurred_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if !cart.is_created() || cart.is_empty() {
            return Err(DomainError::not_found("cart"));
        }
        if cart.owner() != Some(ordered_by) {
            return Err(DomainError::Unauthorized);
        }

        Ok(Self {
            order_id,
            ordered_by,
            items: cart.items().iter().map(OrderItem::from).collect(),
            amount: cart.cart_total(),
            method,
            currency,
            payment_id: format!("pi_{}", order_id.0.as_uuid().simple()),
            occurred_at,
        })
    }

    /// Per-product quantities to take out of stock.
    pub fn stock_lines(&self) -> impl Iterator<Item = (ProductId, i64)> + '_ {
        self.items
            .iter()
            .map(|item| (item.product_id, item.quantity.get()))
    }
}

/// Command: AdvanceStatus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvanceStatus {
    pub order_id: OrderId,
    pub status: OrderStatus,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderCommand {
    PlaceOrder(PlaceOrder),
    AdvanceStatus(AdvanceStatus),
}

/// Event: OrderPlaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPlaced {
    pub order_id: OrderId,
    pub ordered_by: UserId,
    pub items: Vec<OrderItem>,
    pub payment_intent: PaymentIntent,
    pub order_status: OrderStatus,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderStatusChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderStatusChanged {
    pub order_id: OrderId,
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderEvent {
    OrderPlaced(OrderPlaced),
    OrderStatusChanged(OrderStatusChanged),
}

impl Event for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderPlaced(_) => "orders.order.placed",
            OrderEvent::OrderStatusChanged(_) => "orders.order.status_changed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            OrderEvent::OrderPlaced(e) => e.occurred_at,
            OrderEvent::OrderStatusChanged(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Order {
    type Command = OrderCommand;
    type Event = OrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            OrderEvent::OrderPlaced(e) => {
                self.id = e.order_id;
                self.ordered_by = Some(e.ordered_by);
                self.items = e.items.clone();
                self.payment_intent = Some(e.payment_intent.clone());
                self.order_status = e.order_status;
                self.created_at = Some(e.occurred_at);
                self.created = true;
            }
            OrderEvent::OrderStatusChanged(e) => {
                self.order_status = e.to;
            }
        }

        self.updated_at = Some(event.occurred_at());
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            OrderCommand::PlaceOrder(cmd) => self.handle_place(cmd),
            OrderCommand::AdvanceStatus(cmd) => self.handle_advance(cmd),
        }
    }
}

impl Order {
    fn ensure_order_id(&self, order_id: OrderId) -> Result<(), DomainError> {
        if self.id != order_id {
            return Err(DomainError::invariant("order_id mismatch"));
        }
        Ok(())
    }

    fn handle_place(&self, cmd: &PlaceOrder) -> Result<Vec<OrderEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("order already exists"));
        }
        self.ensure_order_id(cmd.order_id)?;

        if cmd.items.is_empty() {
            return Err(DomainError::not_found("cart"));
        }

        let totals = cmd
            .items
            .iter()
            .map(OrderItem::line_total)
            .collect::<DomainResult<Vec<_>>>()?;
        let expected = money::sum(totals)?;
        if expected != cmd.amount {
            return Err(DomainError::invariant(format!(
                "order amount {} does not match items ({expected})",
                cmd.amount
            )));
        }

        let payment_intent = PaymentIntent {
            id: cmd.payment_id.clone(),
            method: cmd.method,
            amount: cmd.amount,
            status: cmd.method.initial_payment_status(),
            currency: cmd.currency.clone(),
            created_at: cmd.occurred_at,
        };

        Ok(vec![OrderEvent::OrderPlaced(OrderPlaced {
            order_id: cmd.order_id,
            ordered_by: cmd.ordered_by,
            items: cmd.items.clone(),
            payment_intent,
            order_status: cmd.method.initial_order_status(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_advance(&self, cmd: &AdvanceStatus) -> Result<Vec<OrderEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found("order"));
        }
        self.ensure_order_id(cmd.order_id)?;

        if !self.order_status.can_transition_to(cmd.status) {
            return Err(DomainError::invariant(format!(
                "cannot move order from {} to {}",
                self.order_status, cmd.status
            )));
        }

        Ok(vec![OrderEvent::OrderStatusChanged(OrderStatusChanged {
            order_id: cmd.order_id,
            from: self.order_status,
            to: cmd.status,
            occurred_at: cmd.occurred_at,
        })])
    }
}
