/// Event assembly: confirmation matching, phase matching, and the driver
/// loop that ties both to the readers and writer.
pub mod confirmation;
pub mod driver;
pub mod phase;

pub use confirmation::ConfirmationMatcher;
pub use driver::EventMatcher;
pub use phase::PhaseMatcher;
