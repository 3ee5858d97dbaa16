use anyhow::Result;
use authgate::cli;
use std::process::ExitCode;

// Main function
#[tokio::main]
async fn main() -> Result<ExitCode> {
    let (action, globals) = cli::start()?;

    let ok = action.execute(&globals).await?;

    Ok(if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
