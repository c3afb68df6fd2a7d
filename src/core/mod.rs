/// Hardware-facing helpers shared by both ends of the link:
/// - temperature probes (shell-command backed, trait for tests)
/// - fan tachometer pulse counting
pub mod tachometer;
pub mod temperature;
