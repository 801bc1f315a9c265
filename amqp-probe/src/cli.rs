//! Command line parser
use std::path::PathBuf;

use clap::Parser;

/// Resolve AMQP connection parameters and, optionally, open a
/// connection with them
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// JSON file holding a map of connection parameters. Command line
    /// options are applied on top of it
    #[clap(long)]
    pub(crate) params_file: Option<PathBuf>,

    /// Connection parameters
    #[command(flatten)]
    pub(crate) connection: amqp_factory::ConnectionArgs,

    /// Also print the layout the parameters will be passed in
    #[clap(long)]
    pub(crate) plan: bool,

    /// Open a connection and a channel, then close them again
    #[clap(long)]
    pub(crate) connect: bool,

    /// File to write logs to. Will log to stderr if not given
    #[clap(long)]
    pub(crate) logfile: Option<PathBuf>,
}
