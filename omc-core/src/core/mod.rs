//! Core domain types and the order state machine.

pub mod errors;
pub mod order_fsm;
pub mod types;

pub use errors::{FsmError, IdempotencyConflict, ReconcileError, StoreError, ValidationError};
pub use order_fsm::{apply_event, transition, OrderEvent};
pub use types::{
    is_on_step, quantize_down, Action, ClientOrderId, Fill, IdempotencyKeyRow, IdempotencyState,
    LedgerCheckpoint, LedgerEvent, LedgerEventType, Order, OrderIntent, OrderOrigin, OrderStatus,
    Position, Side, Symbol, SymbolRules,
};
