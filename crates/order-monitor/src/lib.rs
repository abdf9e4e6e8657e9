//! Order reconciliation and live candle refresh.
//!
//! The monitor polls the broker, diffs the result against its local store,
//! and appends create/update/delete deltas to the orders stream. Alongside it,
//! candle repositories are kept current from a time-and-sales source.

pub mod candles;
pub mod diff;
pub mod live;
pub mod monitor;
pub mod store;

pub use candles::{CandlePool, CandleRepository};
pub use diff::{apply, diff_order, reconcile, ApplyError};
pub use live::LiveCandleRefresher;
pub use monitor::OrderMonitor;
pub use store::OrderStore;
