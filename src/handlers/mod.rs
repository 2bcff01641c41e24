//! Built-in handlers

/// Local command and script execution
pub mod command;
/// Host resource sampling
pub mod monitor;

pub use command::CommandHandler;
pub use monitor::SystemMonitorHandler;

use crate::handler::HandlerRegistry;

/// Register every built-in handler under its task type
pub async fn register_builtin(registry: &HandlerRegistry) {
    for handler in [CommandHandler::command(), CommandHandler::script()] {
        registry.register(handler.task_type(), handler).await;
    }

    let monitor = SystemMonitorHandler;
    registry.register(monitor.task_type(), monitor).await;
}
