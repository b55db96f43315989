use std::time::Duration;

use vsd_gateway::{Client, Error, TransportConfig};

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt::init();

    let base = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "http://127.0.0.1:5001".to_owned());
    let port = std::env::args()
        .nth(2)
        .expect("must pass a serial port as second argument");

    let client = Client::new(base)?;
    client.connect(&TransportConfig::serial(port)).await?;

    let ids = vec![
        "vsd_supply_voltage".to_owned(),
        "vsd_temperature".to_owned(),
    ];

    let mut tick = tokio::time::interval(Duration::from_secs(1));
    loop {
        tick.tick().await;
        let data = client.read_batch(&ids).await;
        println!("{:?}", &data);
    }
}
