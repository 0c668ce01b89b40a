use clap::Parser;

fn main() -> anyhow::Result<()> {
    let cfg = hidxact::config::Config::parse();
    hidxact::run(cfg)
}
