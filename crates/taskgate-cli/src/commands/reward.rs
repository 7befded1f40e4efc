use clap::Args;
use taskgate_core::{Config, Posture};

use super::{print_json, CliResult};

#[derive(Args)]
pub struct RewardArgs {
    /// Planned duration in minutes
    #[arg(long)]
    duration: u32,
    /// Actual elapsed minutes (default: the planned duration)
    #[arg(long)]
    elapsed: Option<u32>,
    #[arg(long)]
    start_timed_out: bool,
    #[arg(long)]
    finish_timed_out: bool,
    /// Use the standing rate
    #[arg(long)]
    standing: bool,
}

pub fn run(args: RewardArgs) -> CliResult {
    let policy = Config::load_or_default().reward_policy();
    let posture = if args.standing {
        Posture::Standing
    } else {
        Posture::Sitting
    };
    let breakdown = policy.breakdown(
        args.duration,
        args.elapsed.unwrap_or(args.duration),
        posture,
        args.start_timed_out,
        args.finish_timed_out,
    );
    print_json(&breakdown)
}
