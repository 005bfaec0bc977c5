use pyrite::{network, uci};

fn main() {
    if let Err(err) = network::init() {
        println!("info string error {}", err);
        std::process::exit(1);
    }
    uci::run();
}
