//! Built-in tools: the storage CRUD, reminder/schedule, working-memory, and
//! approval-gated action surface.

mod actions;
mod expenses;
mod lists;
mod memory;
mod messaging;
mod notes;
mod schedules;
mod time;
mod undo;

use std::sync::Arc;

use super::ToolRegistry;

/// Registers the full built-in tool set.
pub fn register_builtins(registry: &mut ToolRegistry) {
    registry.register(Arc::new(notes::CreateNote));
    registry.register(Arc::new(notes::GetNotes));
    registry.register(Arc::new(notes::UpdateNote));
    registry.register(Arc::new(notes::DeleteNote));

    registry.register(Arc::new(lists::AddToList));
    registry.register(Arc::new(lists::GetLists));
    registry.register(Arc::new(lists::RemoveFromList));

    registry.register(Arc::new(expenses::AddExpense));
    registry.register(Arc::new(expenses::GetExpenses));

    registry.register(Arc::new(memory::Remember));
    registry.register(Arc::new(memory::Forget));
    registry.register(Arc::new(memory::ListWorkingMemory));

    registry.register(Arc::new(schedules::SetReminder));
    registry.register(Arc::new(schedules::AddSchedule));
    registry.register(Arc::new(schedules::RemoveSchedule));
    registry.register(Arc::new(schedules::ToggleSchedule));
    registry.register(Arc::new(schedules::ListSchedules));

    registry.register(Arc::new(actions::RunTerminalCommand));
    registry.register(Arc::new(actions::RunCode));

    registry.register(Arc::new(undo::UndoLast));
    registry.register(Arc::new(time::GetCurrentTime));
    registry.register(Arc::new(messaging::SendMessage));
}

/// Shared helper: deserialize tool params or produce an `InvalidArgs`
/// outcome with the parse error.
macro_rules! parse_args {
    ($ty:ty, $params:expr) => {
        match serde_json::from_value::<$ty>($params) {
            Ok(v) => v,
            Err(e) => {
                return $crate::tools::ToolOutcome::fail(
                    $crate::error::ToolErrorKind::InvalidArgs,
                    format!("invalid arguments: {e}"),
                )
            }
        }
    };
}
pub(crate) use parse_args;
