use clap::Parser;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[arg(short, long, default_value = "config.toml")]
    pub config: String,

    #[arg(short, long, help = "Overrides `server.host` of the config file.")]
    pub bind: Option<String>,

    #[arg(short, long, help = "Overrides `server.port` of the config file.")]
    pub port: Option<u16>,
}
