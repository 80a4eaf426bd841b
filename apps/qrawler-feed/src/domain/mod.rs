//! Domain layer - market data values, calendars, symbol translation and
//! subscription descriptions. No I/O.

pub mod calendar;
pub mod market_data;
pub mod subscription;
pub mod symbol;
