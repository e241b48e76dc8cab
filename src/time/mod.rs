pub mod clock;
pub mod holidays;
pub mod session;

pub use clock::{Clock, ManualClock, SystemClock};
pub use holidays::HolidayCalendar;
pub use session::MarketSession;
