use clap::Parser;

fn main() -> anyhow::Result<()> {
    let cfg = keylink::config::Config::parse();
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(keylink::run(cfg))
}
