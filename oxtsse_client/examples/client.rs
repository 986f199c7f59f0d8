use std::error::Error;
use std::net::TcpStream;

use oxtsse_client::Client;
use oxtsse_common::channel::Channel;
use oxtsse_common::{Config, KeySet};

const SERVER_IP: &str = "127.0.0.1";
const SERVER_PORT: u16 = 8080;

// Must match the server demo's geometry line for line.
const DEMO_CONFIG: &str = "demo-fruit-db\n4\n8\n64\n65536\n16\n";

fn main() -> Result<(), Box<dyn Error>> {
    pretty_env_logger::init();

    let config = Config::parse(DEMO_CONFIG)?;
    let mut client = Client::new(config, KeySet::fixed_for_testing())?;

    let queries: [(&str, &[&str]); 3] = [
        ("fruit", &["red"]),
        ("fruit", &["red", "small"]),
        ("yellow", &[]),
    ];

    for (first, secondary) in queries {
        let address = format!("{}:{}", SERVER_IP, SERVER_PORT);
        let stream = TcpStream::connect(&address)?;
        let mut channel = Channel::new(stream);

        let secondary_bytes: Vec<&[u8]> = secondary.iter().map(|s| s.as_bytes()).collect();
        let matches = client.search(&mut channel, first.as_bytes(), &secondary_bytes)?;

        println!("--------------------------------------------------");
        println!("Searching for {} AND {:?}", first, secondary);
        println!("{} matching documents:", matches.len());
        for id in matches {
            let text: Vec<u8> = id.iter().copied().take_while(|&b| b != 0).collect();
            println!("  {}", String::from_utf8_lossy(&text));
        }
    }

    Ok(())
}
