use async_trait::async_trait;
use serde_json::{json, Value};

use super::{HandlerError, JobHandler};

/// Counts the words, lines and characters of the UTF-8 text file at `file_path`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WordCountHandler;

impl WordCountHandler {
    pub const JOB_TYPE: &'static str = "word_count";
}

struct Counts {
    words: usize,
    lines: usize,
    chars: usize,
}

impl Counts {
    fn of(content: &str) -> Self {
        // A final line without a trailing newline still counts as a line.
        let unterminated = !content.is_empty() && !content.ends_with('\n');
        Self {
            words: content.split_whitespace().count(),
            lines: content.matches('\n').count() + usize::from(unterminated),
            chars: content.chars().count(),
        }
    }
}

#[async_trait]
impl JobHandler for WordCountHandler {
    async fn run(&self, payload: Value) -> Result<Value, HandlerError> {
        let file_path = payload
            .get("file_path")
            .and_then(Value::as_str)
            .filter(|path| !path.is_empty())
            .ok_or_else(|| HandlerError::InvalidPayload("Missing 'file_path' in payload".into()))?;

        let content = tokio::fs::read_to_string(file_path).await?;
        let counts = Counts::of(&content);

        Ok(json!({
            "file_path": file_path,
            "word_count": counts.words,
            "line_count": counts.lines,
            "char_count": counts.chars,
        }))
    }
}

#[cfg(test)]
mod test {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn counts_lines_with_and_without_trailing_newline() {
        let counts = Counts::of("one two\nthree\n");
        assert_eq!((counts.words, counts.lines, counts.chars), (3, 2, 14));

        let counts = Counts::of("one two\nthree");
        assert_eq!((counts.words, counts.lines, counts.chars), (3, 2, 13));

        let counts = Counts::of("");
        assert_eq!((counts.words, counts.lines, counts.chars), (0, 0, 0));
    }

    #[test]
    fn counts_characters_not_bytes() {
        let counts = Counts::of("héllo wörld");

        assert_eq!(counts.words, 2);
        assert_eq!(counts.chars, 11);
    }

    #[tokio::test]
    async fn counts_a_file() {
        let path = std::env::temp_dir().join(format!("word-count-{}.txt", uuid::Uuid::new_v4()));
        tokio::fs::write(&path, "the quick brown fox\njumps over\nthe lazy dog")
            .await
            .unwrap();
        let file_path = path.to_str().unwrap();

        let result = WordCountHandler
            .run(json!({"file_path": file_path}))
            .await
            .unwrap();
        tokio::fs::remove_file(&path).await.unwrap();

        assert_eq!(
            result,
            json!({
                "file_path": file_path,
                "word_count": 9,
                "line_count": 3,
                "char_count": 43,
            })
        );
    }

    #[tokio::test]
    async fn missing_file_path_is_invalid() {
        assert_matches!(
            WordCountHandler.run(json!({})).await,
            Err(HandlerError::InvalidPayload(_))
        );
    }

    #[tokio::test]
    async fn missing_file_is_an_io_error() {
        assert_matches!(
            WordCountHandler
                .run(json!({"file_path": "/definitely/not/here.txt"}))
                .await,
            Err(HandlerError::Io(_))
        );
    }
}
