/*
Copyright © 2024–2025 Mako and JayAndJef

This file is part of coop.

coop is free software: you can redistribute it and/or modify it under the terms of the GNU General
Public License as published by the Free Software Foundation, either version 3 of the License, or (at
your option) any later version.

coop is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the
implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public
License for more details.

You should have received a copy of the GNU General Public License along with coop. If not, see
<https://www.gnu.org/licenses/>.
*/

use anyhow::{Context, Result, ensure};
use clap::Parser;
use log::info;
use scheduler::{MAX_TASKS, MonotonicClock, STACK_SIZE, Scheduler, SchedulerConfig, TerminalInput};

/// Run a handful of cooperative tasks against the terminal.
///
/// Ticker tasks print and sleep, an echo task prints every key until `q`,
/// and a joiner reports when the tickers are done.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Number of ticker tasks
    #[arg(long, default_value_t = 3)]
    tickers: usize,

    /// Lines each ticker prints before exiting
    #[arg(long, default_value_t = 5)]
    ticks: u32,

    /// Base sleep between ticks; ticker n sleeps n times this long
    #[arg(long, default_value_t = 300)]
    interval_ms: u64,

    /// Task table size, including the main task
    #[arg(long, default_value_t = MAX_TASKS)]
    capacity: usize,

    /// Stack size of every task in bytes
    #[arg(long, default_value_t = STACK_SIZE)]
    stack_size: usize,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    // tickers, the echo task and the joiner, plus main
    ensure!(
        args.tickers + 3 <= args.capacity,
        "{} tickers do not fit in a table of {} tasks",
        args.tickers,
        args.capacity
    );

    let input = TerminalInput::stdin().context("failed to switch the terminal to raw input")?;
    let config = SchedulerConfig::default()
        .with_capacity(args.capacity)
        .with_stack_size(args.stack_size);
    let sched = Scheduler::init(config, input, MonotonicClock::new());

    let mut tickers = Vec::with_capacity(args.tickers);
    for n in 1..=args.tickers {
        let task = sched.clone();
        let interval = args.interval_ms * n as u64;
        let ticks = args.ticks;
        tickers.push(sched.try_create(move || {
            for tick in 1..=ticks {
                println!("ticker {n}: tick {tick}/{ticks}");
                task.sleep(interval);
            }
        })?);
    }

    let task = sched.clone();
    sched.try_create(move || {
        for handle in tickers {
            task.wait_for(handle);
        }
        println!("all tickers finished, press q to quit");
    })?;

    let task = sched.clone();
    sched.try_create(move || {
        loop {
            match task.read_input() {
                'q' => break,
                key => println!("key {key:?}"),
            }
        }
    })?;

    info!("running {} tasks", sched.task_count() - 1);
    sched.run();
    println!("all tasks finished");
    Ok(())
}
