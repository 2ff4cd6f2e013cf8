use std::fs::File;
use std::io;
use std::net::SocketAddr;
use std::path::Path;

use quizcluster::beacon::Beacon;
use quizcluster::message::OPTIONS;
use quizcluster::Question;

/// Question bank used when no file is given.
pub fn default_questions() -> Vec<Question> {
    vec![
        Question::new(
            "What is the capital of Brazil?",
            ["Sao Paulo", "Rio de Janeiro", "Brasilia", "Belo Horizonte"],
            2,
        ),
        Question::new("How many planets are in the solar system?", ["7", "8", "9", "10"], 1),
        Question::new(
            "Which is the largest ocean on Earth?",
            ["Atlantic", "Pacific", "Indian", "Arctic"],
            1,
        ),
        Question::new("In which year did Cabral reach Brazil?", ["1500", "1501", "1499", "1502"], 0),
        Question::new(
            "Which language is most used on the web?",
            ["Python", "Java", "JavaScript", "C++"],
            2,
        ),
    ]
}

/// Reads a JSON array of questions, e.g.
/// `[{"text": "2 + 2?", "options": ["3", "4", "5", "22"], "correct": 1}]`.
pub fn load_questions(path: &Path) -> io::Result<Vec<Question>> {
    let questions: Vec<Question> = serde_json::from_reader(File::open(path)?)?;
    if questions.is_empty() {
        return Err(invalid("empty question bank".to_owned()))
    }
    for question in &questions {
        if question.correct >= OPTIONS {
            return Err(invalid(format!("correct option out of range in {:?}", question.text)))
        }
        let mut fields = std::iter::once(&question.text).chain(question.options.iter());
        if let Some(field) = fields.find(|field| !sendable(field)) {
            return Err(invalid(format!("reserved character in {:?}", field)))
        }
    }
    Ok(questions)
}

/// Whether `field` fits in one pipe-delimited record.
fn sendable(field: &str) -> bool {
    !field.contains(|c: char| c == '|' || c == '\r' || c == '\n')
}

fn invalid(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}

/// Unicast discovery when a bind address is given, multicast otherwise.
pub fn beacon(bind: Option<SocketAddr>, targets: Vec<SocketAddr>) -> Beacon {
    match bind {
    | Some(bind) => Beacon::Unicast { bind, targets },
    | None => Beacon::default(),
    }
}

/// Logs to stderr; each `-v` raises the level from warnings up to trace.
pub fn init_logging(verbosity: u8) {
    let level = match verbosity {
    | 0 => log::LevelFilter::Warn,
    | 1 => log::LevelFilter::Info,
    | 2 => log::LevelFilter::Debug,
    | _ => log::LevelFilter::Trace,
    };
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!("[{}][{}] {}", record.level(), record.target(), message))
        })
        .level(level)
        .chain(io::stderr())
        .apply()
        .expect("[INTERNAL ERROR]: logger initialized twice");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_bank_is_answerable() {
        let questions = default_questions();
        assert_eq!(questions.len(), 5);
        assert!(questions.iter().all(|question| question.correct < OPTIONS));
    }

    #[test]
    fn loads_bank_from_json() {
        let path = std::env::temp_dir().join(format!("quizroom-bank-{}.json", std::process::id()));
        std::fs::write(&path, r#"[{"text": "2 + 2?", "options": ["3", "4", "5", "22"], "correct": 1}]"#).unwrap();
        let questions = load_questions(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(questions, vec![Question::new("2 + 2?", ["3", "4", "5", "22"], 1)]);
    }

    #[test]
    fn rejects_out_of_range_answer() {
        let path = std::env::temp_dir().join(format!("quizroom-bad-{}.json", std::process::id()));
        std::fs::write(&path, r#"[{"text": "?", "options": ["a", "b", "c", "d"], "correct": 4}]"#).unwrap();
        let result = load_questions(&path);
        std::fs::remove_file(&path).ok();
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn rejects_fields_that_break_records() {
        let path = std::env::temp_dir().join(format!("quizroom-pipe-{}.json", std::process::id()));
        std::fs::write(&path, r#"[{"text": "a|b?", "options": ["a", "b", "c", "d"], "correct": 0}]"#).unwrap();
        let pipe = load_questions(&path);
        std::fs::write(&path, r#"[{"text": "ok?", "options": ["a", "two\nlines", "c", "d"], "correct": 0}]"#).unwrap();
        let newline = load_questions(&path);
        std::fs::remove_file(&path).ok();
        assert_eq!(pipe.unwrap_err().kind(), io::ErrorKind::InvalidData);
        assert_eq!(newline.unwrap_err().kind(), io::ErrorKind::InvalidData);
    }
}
