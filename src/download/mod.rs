mod artifacts;
mod controller;

pub use controller::DownloadController;
