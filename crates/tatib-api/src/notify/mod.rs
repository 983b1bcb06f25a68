//! Parent notification: message composition, the outbound gateway seam and
//! the dispatcher that records delivery state.

pub mod compose;
pub mod dispatch;
pub mod gateway;
