//! Process-level resilience: the panic hook installed by `omc-bin`'s
//! `main`. Retry/backoff and rate limiting live in
//! `adapter::retry`/`adapter::rate_limit` since they are adapter-scoped,
//! not process-scoped, so this module only covers the one concern that
//! genuinely spans the whole process.

pub mod panic;

pub use panic::install_panic_handler;
