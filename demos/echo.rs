//! Echo server and client in one process.
//!
//! This example demonstrates:
//! - Building a server with plain and typed functions
//! - Calling them through a client, with and without `_suppress`
//! - Stopping the server with `kill_server`
//!
//! # Running
//!
//! ```sh
//! cargo run --example echo
//! ```
//!
//! To talk to it from another process instead, run `zrpc serve tcp://*:4242`
//! and `zrpc call tcp://127.0.0.1:4242 echo hello`.

use serde::{Deserialize, Serialize};
use zrpc::{CallArgs, Client, HandlerError, Server, ZrpcError};

/// Output of the `shout` method.
#[derive(Serialize, Deserialize, Debug)]
struct Shouted {
    text: String,
    length: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let server = Server::builder("tcp://127.0.0.1:0")
        .typed_function("shout", |(text,): (String,)| async move {
            Ok::<_, HandlerError>(Shouted {
                length: text.len(),
                text: text.to_uppercase(),
            })
        })
        .function("divide", |args: CallArgs| async move {
            let (a, b): (f64, f64) = args.parse()?;
            if b == 0.0 {
                return Err(HandlerError::new("ZeroDivisionError", "division by zero"));
            }
            Ok(serde_json::Value::from(a / b))
        })
        .bind()
        .await?;
    let address = server.bound_address().to_string();
    let serving = server.spawn();

    let mut client = Client::connect(&address).await?;
    println!("functions: {:?}", client.list_functions().await?);

    let shouted: Shouted = client.call_as("shout", CallArgs::new().arg("hello")).await?;
    println!("shout -> {:?}", shouted);

    let quotient = client.call("divide", CallArgs::new().arg(1).arg(4)).await?;
    println!("divide -> {}", quotient);

    match client.call("divide", CallArgs::new().arg(1).arg(0)).await {
        Err(ZrpcError::Remote(failure)) => println!("divide failed remotely: {}", failure),
        other => println!("unexpected: {:?}", other),
    }

    let quiet = client
        .call("divide", CallArgs::new().arg(1).arg(0).kwarg("_suppress", true))
        .await?;
    println!("suppressed -> {}", quiet);

    client.kill_server().await?;
    serving.await??;
    Ok(())
}
