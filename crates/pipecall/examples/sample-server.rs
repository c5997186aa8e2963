//! Sample server: answers every string request with its length.
//!
//! Run with:
//!   cargo run --example sample-server
//!
//! In another terminal:
//!   cargo run --example sample-client
//!
//! Press enter to cancel the listener instances, then enter again to exit.

#[cfg(unix)]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    use std::io::BufRead;

    use pipecall::Server;

    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_writer(std::io::stderr)
        .init();

    let server = Server::start("sample_pipe", |request: String| {
        request.chars().count() as u32
    })?;
    let cancel = server.cancel_handle();

    let waiter = tokio::spawn(async move {
        if let Err(err) = server.when_all().await {
            println!("{err}");
        }
    });

    let stdin = std::io::stdin();
    let mut line = String::new();

    println!("Press enter to cancel pipe server");
    stdin.lock().read_line(&mut line)?;
    cancel.cancel();
    waiter.await?;

    println!("Press enter to end application");
    stdin.lock().read_line(&mut line)?;
    Ok(())
}

#[cfg(not(unix))]
fn main() {
    eprintln!("sample-server requires a unix platform");
}
