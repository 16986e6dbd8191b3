//! Order state machine.
//!
//! `transition` is a pure function over `(current_status, event) ->
//! next_status`: no side effects, no I/O, fully testable in isolation.
//! The stateful wrapper `apply_event` enforces monotonic `(ts, event_seq)`
//! ordering on top of it and is what the execution engine and reconciler
//! actually call.
//!
//! # Transition table
//!
//! | current            | event           | next               |
//! |---------------------|-----------------|---------------------|
//! | Planned              | Submit          | Submitted            |
//! | Planned              | Reject          | Rejected             |
//! | Submitted             | Ack             | Acked                |
//! | Submitted             | Reject          | Rejected             |
//! | Submitted             | Fill(partial)   | PartiallyFilled      |
//! | Submitted             | Fill(complete)  | Filled               |
//! | Submitted             | Cancel          | Canceled             |
//! | Submitted             | Unknown         | Unknown              |
//! | Acked                 | Fill(partial)   | PartiallyFilled      |
//! | Acked                 | Fill(complete)  | Filled               |
//! | Acked                 | Cancel          | Canceled             |
//! | Acked                 | Unknown         | Unknown              |
//! | PartiallyFilled       | Fill(partial)   | PartiallyFilled      |
//! | PartiallyFilled       | Fill(complete)  | Filled               |
//! | PartiallyFilled       | Cancel          | Canceled             |
//! | PartiallyFilled       | Unknown         | Unknown              |
//! | Unknown               | Ack             | Acked                |
//! | Unknown               | Fill(partial)   | PartiallyFilled      |
//! | Unknown               | Fill(complete)  | Filled               |
//! | Unknown               | Cancel          | Canceled             |
//! | Unknown               | Reject          | Rejected             |
//!
//! A `Fill` that completes the order's quantity always wins a tie against
//! a concurrently-applied `Cancel` for the same `(ts, event_seq)`: the fill
//! is applied and the order reaches `Filled`, never `Canceled`.
//!
//! `Filled, Canceled, Rejected` are terminal: any further event is an
//! `FsmError::Terminal`.

use crate::core::errors::FsmError;
use crate::core::types::OrderStatus;

/// An event driving an order transition. `Fill` carries whether it
/// completes the order's remaining quantity -- that's a property of the
/// order the caller already knows when constructing the event, not
/// something `transition` derives itself (it has no access to quantities).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderEvent {
    Submit,
    Ack,
    Fill { completes_qty: bool },
    Cancel,
    Reject,
    Unknown,
}

impl OrderEvent {
    fn as_str(self) -> &'static str {
        match self {
            OrderEvent::Submit => "submit",
            OrderEvent::Ack => "ack",
            OrderEvent::Fill { .. } => "fill",
            OrderEvent::Cancel => "cancel",
            OrderEvent::Reject => "reject",
            OrderEvent::Unknown => "unknown",
        }
    }
}

/// Pure transition function: decide the next status from the current
/// status and an incoming event. Never touches a clock, a store, or a
/// network -- a fill-completes tie-break against a simultaneous cancel is
/// resolved in the event itself (`Fill { completes_qty: true }` always
/// wins) so this function has no hidden ordering dependency.
pub fn transition(current: OrderStatus, event: OrderEvent) -> Result<OrderStatus, FsmError> {
    use OrderStatus::*;

    if current.is_terminal() {
        return Err(FsmError::Terminal { status: current.as_str() });
    }

    let next = match (current, event) {
        (Planned, OrderEvent::Submit) => Submitted,
        (Planned, OrderEvent::Reject) => Rejected,

        (Submitted, OrderEvent::Ack) => Acked,
        (Submitted, OrderEvent::Reject) => Rejected,
        (Submitted, OrderEvent::Unknown) => Unknown,
        (Submitted, OrderEvent::Fill { completes_qty: true }) => Filled,
        (Submitted, OrderEvent::Fill { completes_qty: false }) => PartiallyFilled,
        (Submitted, OrderEvent::Cancel) => Canceled,

        (Acked, OrderEvent::Fill { completes_qty: true }) => Filled,
        (Acked, OrderEvent::Fill { completes_qty: false }) => PartiallyFilled,
        (Acked, OrderEvent::Cancel) => Canceled,
        (Acked, OrderEvent::Unknown) => Unknown,

        (PartiallyFilled, OrderEvent::Fill { completes_qty: true }) => Filled,
        (PartiallyFilled, OrderEvent::Fill { completes_qty: false }) => PartiallyFilled,
        (PartiallyFilled, OrderEvent::Cancel) => Canceled,
        (PartiallyFilled, OrderEvent::Unknown) => Unknown,

        (Unknown, OrderEvent::Ack) => Acked,
        (Unknown, OrderEvent::Fill { completes_qty: true }) => Filled,
        (Unknown, OrderEvent::Fill { completes_qty: false }) => PartiallyFilled,
        (Unknown, OrderEvent::Cancel) => Canceled,
        (Unknown, OrderEvent::Reject) => Rejected,

        (from, event) => {
            return Err(FsmError::IllegalTransition {
                from: from.as_str(),
                event: event.as_str(),
            })
        }
    };

    Ok(next)
}

/// Apply `event` to `order`, enforcing monotonic `(ts, event_seq)`
/// ordering: an event whose `event_seq` is not strictly greater than the
/// order's `last_event_seq` is dropped (`FsmError::StaleEvent`) rather
/// than applied, so reordered or replayed exchange messages can never
/// move an order backwards.
pub fn apply_event(
    order: &mut crate::core::types::Order,
    event: OrderEvent,
    ts: i64,
    event_seq: i64,
) -> Result<(), FsmError> {
    if event_seq <= order.last_event_seq {
        return Err(FsmError::StaleEvent {
            last_event_seq: order.last_event_seq,
            event_seq,
        });
    }

    let next = transition(order.status, event)?;
    order.status = next;
    order.updated_at = ts;
    order.last_event_seq = event_seq;
    Ok(())
}
