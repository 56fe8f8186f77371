use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "gcectl",
    about = "Google Compute Engine commands to control VMs",
    version
)]
pub struct Cli {
    /// Path to config file [default: ~/.config/gcectl/config.yaml]
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List all VMs in the config file
    List,

    /// Describe a VM
    Describe {
        /// VM name as it appears in the config file
        vm: String,
    },

    /// Turn on VMs
    On {
        #[arg(required = true)]
        vms: Vec<String>,
    },

    /// Turn off VMs
    Off {
        #[arg(required = true)]
        vms: Vec<String>,
    },

    /// Change VM settings
    Set {
        #[command(subcommand)]
        setting: SetCommand,
    },

    /// Print version information
    Version,
}

#[derive(Subcommand, Debug)]
pub enum SetCommand {
    /// Change the machine type of a stopped VM
    MachineType {
        vm: String,
        /// e.g. e2-medium, n2-standard-4
        machine_type: String,
    },

    /// Attach an instance schedule policy (or detach it with --un)
    SchedulePolicy {
        vm: String,
        policy: String,

        /// Detach the policy instead of attaching it
        #[arg(short, long)]
        un: bool,
    },
}
