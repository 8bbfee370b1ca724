use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    match messenger_sync_lib::run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("[App] 退出: {}", e);
            eprintln!("messenger-sync: {}", e);
            ExitCode::FAILURE
        }
    }
}
