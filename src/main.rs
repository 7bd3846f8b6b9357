use std::env;
use std::fs;
use std::process::ExitCode;

use tracing_subscriber::EnvFilter;

use crossfill::{render_grid, Filler, Puzzle, Vocabulary};

fn load_vocabulary(contents: &str) -> Vocabulary {
    Vocabulary::new(
        contents
            .lines()
            .map(|line| line.trim().to_uppercase())
            .filter(|word| !word.is_empty()),
    )
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut args = env::args().skip(1);
    let (structure_path, words_path) = match (args.next(), args.next()) {
        (Some(structure), Some(words)) => (structure, words),
        _ => {
            eprintln!("Usage: crossfill <structure-file> <words-file> [output-file]");
            return ExitCode::FAILURE;
        }
    };
    let output_path = args.next();

    let template = match fs::read_to_string(&structure_path) {
        Ok(contents) => contents,
        Err(err) => {
            eprintln!("Failed to read {}: {}", structure_path, err);
            return ExitCode::FAILURE;
        }
    };
    let puzzle = match Puzzle::from_template(&template) {
        Ok(puzzle) => puzzle,
        Err(err) => {
            eprintln!("Invalid structure {}: {}", structure_path, err);
            return ExitCode::FAILURE;
        }
    };

    let word_contents = match fs::read_to_string(&words_path) {
        Ok(contents) => contents,
        Err(err) => {
            eprintln!("Failed to read {}: {}", words_path, err);
            return ExitCode::FAILURE;
        }
    };
    let vocabulary = load_vocabulary(&word_contents);

    match Filler::new(&puzzle, &vocabulary).fill() {
        Some(result) => {
            println!(
                "Filled {} slots in {:?} ({} states, {} backtracks)",
                result.choices.len(),
                result.statistics.duration,
                result.statistics.states,
                result.statistics.backtracks,
            );

            let rendered = render_grid(&puzzle, &vocabulary, &result.choices);
            println!("{}", rendered);

            if let Some(path) = output_path {
                if let Err(err) = fs::write(&path, rendered + "\n") {
                    eprintln!("Failed to write {}: {}", path, err);
                    return ExitCode::FAILURE;
                }
            }
            ExitCode::SUCCESS
        }
        None => {
            println!("No solution.");
            ExitCode::FAILURE
        }
    }
}
