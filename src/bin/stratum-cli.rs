//! Interactive client shell: reads statements from stdin, ships each as a
//! wire frame and prints the reply.

use std::io::{self, BufRead, Write};
use std::net::TcpStream;
use std::process;

use stratum::transport::{Frame, Transport};

const SERVER_ADDR: &str = "127.0.0.1:9999";

fn main() {
    let stream = match TcpStream::connect(SERVER_ADDR) {
        Ok(stream) => stream,
        Err(err) => {
            eprintln!("cannot connect to {SERVER_ADDR}: {err}");
            process::exit(1);
        }
    };
    let mut transport = match Transport::new(stream) {
        Ok(transport) => transport,
        Err(err) => {
            eprintln!("connection setup failed: {err}");
            process::exit(1);
        }
    };

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!(":> ");
        io::stdout().flush().expect("flush prompt");

        let Some(Ok(line)) = lines.next() else {
            break;
        };
        let statement = line.trim();
        if statement.is_empty() {
            continue;
        }
        if statement.eq_ignore_ascii_case("exit") || statement.eq_ignore_ascii_case("quit") {
            break;
        }

        if let Err(err) = transport.send(&Frame::Data(statement.as_bytes().to_vec())) {
            eprintln!("send failed: {err}");
            break;
        }
        match transport.receive() {
            Ok(Some(Frame::Data(reply))) => {
                println!("{}", String::from_utf8_lossy(&reply));
            }
            Ok(Some(Frame::Err(message))) => {
                println!("Error: {message}");
            }
            Ok(None) => {
                eprintln!("server closed the connection");
                break;
            }
            Err(err) => {
                eprintln!("receive failed: {err}");
                break;
            }
        }
    }
}
