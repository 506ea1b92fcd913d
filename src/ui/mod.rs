pub mod app;
pub mod surface;

pub use app::PodplayApp;
pub use surface::TerminalSurface;
