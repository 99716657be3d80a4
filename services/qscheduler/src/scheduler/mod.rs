//! Background scheduling work.

mod worker;

pub use worker::BalanceWorker;
