pub mod clock;
pub mod cursor;
pub mod driver;
pub mod eligibility;
pub mod lock;
pub mod progress;
pub mod record_store;
pub mod scanner;
pub mod state_store;
pub mod storage;
pub mod transformer;
pub mod workers_ai;
