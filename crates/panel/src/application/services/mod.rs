pub mod panel_command_service;

pub use panel_command_service::{PanelCommandService, PanelReply};
