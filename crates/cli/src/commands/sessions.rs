use crate::setup::{CliResult, Workspace};

pub async fn run(ws: &Workspace, delete: Option<String>) -> CliResult {
    let store = ws.sessions(true).await?;
    let (app_name, user_id) = (&ws.config.app_name, &ws.config.user_id);

    if let Some(id) = delete {
        if store.delete_session(app_name, user_id, &id).await? {
            println!("  Deleted session {id}");
        } else {
            println!("  No session {id}");
        }
        return Ok(());
    }

    let sessions = store.list_sessions(app_name, user_id).await?;
    if sessions.is_empty() {
        println!("  No saved sessions. Start one with `wayfarer chat --persist`.");
        return Ok(());
    }

    println!("  {:<38} {:>7}  Last active", "Session", "Events");
    for summary in sessions {
        println!(
            "  {:<38} {:>7}  {}",
            summary.id,
            summary.event_count,
            summary.updated_at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}
