//! GoalFlow Signals - offline signal report over a day's results
//!
//! Loads one day of stored observations and prints:
//! 1. The consistency encoder's per-offset match rates
//! 2. The live detector's full candidate list with elimination verdicts
//!
//! Usage:
//!   cargo run --release --bin goalflow_signals -- [--date YYYY-MM-DD] [--field outcome|offset1..offset5]
//!
//! Defaults: today's date, raw outcome field. DATA_DIR selects the store
//! root as in the main runtime.

use chrono::{Local, NaiveDate};
use goalflow::clock;
use goalflow::signal_core::{detector, encoder, ComparisonField, OffsetState};
use goalflow::store::ResultStore;

struct Args {
    date: NaiveDate,
    field: ComparisonField,
}

fn parse_args() -> Result<Args, String> {
    let mut date = Local::now().date_naive();
    let mut field = ComparisonField::Outcome;

    let mut argv = std::env::args().skip(1);
    while let Some(flag) = argv.next() {
        match flag.as_str() {
            "--date" => {
                let raw = argv.next().ok_or("--date needs a value")?;
                date = NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
                    .map_err(|_| format!("unreadable date {:?} (want YYYY-MM-DD)", raw))?;
            }
            "--field" => {
                let raw = argv.next().ok_or("--field needs a value")?;
                field = ComparisonField::parse(&raw)
                    .ok_or_else(|| format!("unknown field {:?} (want outcome|offset1..offset5)", raw))?;
            }
            other => return Err(format!("unknown flag {:?}", other)),
        }
    }
    Ok(Args { date, field })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .target(env_logger::Target::Stderr)
        .init();

    let args = match parse_args() {
        Ok(args) => args,
        Err(msg) => {
            eprintln!("❌ {}", msg);
            std::process::exit(2);
        }
    };

    let data_dir = std::env::var("DATA_DIR").unwrap_or_else(|_| "data".to_string());
    let store = ResultStore::new(&data_dir)?;
    let observations = store.all_for(args.date).await?;

    println!("📊 GoalFlow signals for {} ({} observations)", args.date, observations.len());
    if observations.is_empty() {
        println!("   └─ nothing stored for this day");
        return Ok(());
    }

    // Encoder summary: match/mismatch counts per offset distance
    let records = encoder::encode_day(&observations);
    println!();
    println!("Consistency encoding:");
    for n in 1..=encoder::OFFSET_COUNT {
        let mut matches = 0usize;
        let mut mismatches = 0usize;
        for record in &records {
            match record.offset(n) {
                Some(OffsetState::Match) => matches += 1,
                Some(OffsetState::Mismatch) => mismatches += 1,
                _ => {}
            }
        }
        let compared = matches + mismatches;
        let rate = if compared > 0 {
            100.0 * matches as f64 / compared as f64
        } else {
            0.0
        };
        println!(
            "   N={} (−{} min): {} match / {} mismatch ({:.1}% match)",
            n,
            encoder::offset_minutes(n as u32),
            matches,
            mismatches,
            rate
        );
    }

    // Detector report over the same observations
    println!();
    match detector::detect(&observations, args.field) {
        None => println!("Detector: no resolved observations to anchor a window"),
        Some(detection) => {
            println!(
                "Detector window {}:xx / {}:xx / {}:xx on field {}:",
                detection.window[0], detection.window[1], detection.window[2], detection.field
            );
            if detection.candidates.is_empty() {
                println!("   └─ no candidates");
            }
            for candidate in &detection.candidates {
                let mark = if candidate.eliminated { "❌" } else { "✅" };
                let verdict = match candidate.reason {
                    Some(reason) => format!("eliminated: {}", reason),
                    None => "accepted".to_string(),
                };
                println!(
                    "   {} [{}] minute :{:02} (base :{:02}, from {}): {}",
                    mark,
                    candidate.entity,
                    candidate.minute,
                    candidate.base_minute,
                    clock::format_minutes(clock::to_minutes(detection.window[0], candidate.minute)),
                    verdict
                );
            }
            let accepted = detection.accepted().count();
            println!(
                "   └─ {} accepted / {} total",
                accepted,
                detection.candidates.len()
            );
        }
    }

    Ok(())
}
