//! `client <daemon_port>` — a small interactive menu over the plain TCP
//! client/daemon session described in §6. Talks to the daemon using the
//! same wire codec as peers, with `from_id = 0`.

use std::io::{self, Write};

use anyhow::{Context, Result};
use photomesh::types::CLIENT_ID;
use photomesh::wire::{read_message, write_message, Message};
use tokio::net::TcpStream;

#[tokio::main]
async fn main() -> Result<()> {
    let port: u16 = std::env::args()
        .nth(1)
        .context("usage: client <daemon_port>")?
        .parse()
        .context("daemon_port must be a u16")?;

    let addr = format!("127.0.0.1:{port}");
    let mut stream = TcpStream::connect(&addr)
        .await
        .with_context(|| format!("connecting to daemon at {addr}"))?;

    loop {
        println!("\n1) list known images\n2) fetch image by hash\n3) quit");
        print!("> ");
        io::stdout().flush().ok();

        let mut choice = String::new();
        if io::stdin().read_line(&mut choice)? == 0 {
            break;
        }

        match choice.trim() {
            "1" => {
                write_message(&mut stream, &Message::RequestList { from_id: CLIENT_ID }).await?;
                match read_message(&mut stream).await? {
                    Some(Message::List { hashes }) => {
                        if hashes.is_empty() {
                            println!("(no images known to the network)");
                        } else {
                            for (i, h) in hashes.iter().enumerate() {
                                println!("{i}: {}", String::from_utf8_lossy(h));
                            }
                        }
                    }
                    Some(other) => println!("unexpected reply: {}", other.kind()),
                    None => {
                        println!("daemon closed the connection");
                        break;
                    }
                }
            }
            "2" => {
                print!("hash (hex): ");
                io::stdout().flush().ok();
                let mut hash_str = String::new();
                io::stdin().read_line(&mut hash_str)?;
                let hash = hash_str.trim().as_bytes().to_vec();
                if hash.is_empty() {
                    continue;
                }

                write_message(
                    &mut stream,
                    &Message::RequestImage {
                        from_id: CLIENT_ID,
                        hash,
                    },
                )
                .await?;

                match read_message(&mut stream).await? {
                    Some(Message::Image {
                        bytes, filename, ..
                    }) => {
                        let out_path = std::env::temp_dir().join(&filename);
                        std::fs::write(&out_path, &bytes)
                            .with_context(|| format!("writing {}", out_path.display()))?;
                        println!("saved to {}", out_path.display());
                    }
                    Some(other) => println!("unexpected reply: {}", other.kind()),
                    None => {
                        println!("daemon closed the connection");
                        break;
                    }
                }
            }
            "3" | "q" | "quit" => break,
            _ => println!("unrecognized choice"),
        }
    }

    Ok(())
}
