//! Sample console client for `sample-server`.
//!
//! Run with:
//!   cargo run --example sample-client

use std::io::BufRead;

use pipecall::Client;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let client = Client::<String, u32>::new("sample_pipe");

    println!("Input \"exit\" to end application");
    println!("Input any other line to get its length from the pipe server");

    for line in std::io::stdin().lock().lines() {
        let request = line?;
        if request == "exit" {
            break;
        }
        let response = client.request(&request)?;
        println!("\"{request}\" length is {response}");
    }

    Ok(())
}
