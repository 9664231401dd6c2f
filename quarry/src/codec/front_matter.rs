use crate::collection::Document;
use crate::common::{Value, FRONT_MATTER_DELIMITER};
use crate::errors::{ErrorKind, QuarryError, QuarryResult};

/// Splits a front-matter file into its metadata and its body.
///
/// A file starting with a `---` line, followed by YAML and a closing `---`
/// line, yields the parsed metadata and whatever follows the closing line.
/// Any other file is all body.
pub fn split_front_matter(text: &str) -> QuarryResult<(Document, String)> {
    let opening = format!("{}\n", FRONT_MATTER_DELIMITER);
    let rest = match text.strip_prefix(&opening) {
        Some(rest) => rest,
        None => return Ok((Document::new(), text.to_string())),
    };

    let closing = format!("\n{}", FRONT_MATTER_DELIMITER);
    let (metadata, body) = if let Some(body) = rest.strip_prefix(FRONT_MATTER_DELIMITER) {
        // empty metadata block
        ("", body)
    } else {
        match rest.find(&closing) {
            Some(end) => (&rest[..end + 1], &rest[end + closing.len()..]),
            None => {
                log::error!("Front matter block is not closed");
                return Err(QuarryError::new(
                    "Front matter block is not closed by a '---' line",
                    ErrorKind::EncodingError,
                ));
            }
        }
    };

    let body = match body.strip_prefix('\n') {
        Some(body) => body,
        None if body.is_empty() => body,
        None => {
            log::error!("Front matter closing delimiter is followed by text on the same line");
            return Err(QuarryError::new(
                "Front matter closing delimiter must be on its own line",
                ErrorKind::EncodingError,
            ));
        }
    };

    let metadata = if metadata.trim().is_empty() {
        Document::new()
    } else {
        match serde_yaml::from_str::<Value>(metadata)? {
            Value::Document(doc) => doc,
            Value::Null => Document::new(),
            other => {
                log::error!("Front matter must be a mapping, found {}", other.type_name());
                return Err(QuarryError::new(
                    &format!("Front matter must be a mapping, found {}", other.type_name()),
                    ErrorKind::EncodingError,
                ));
            }
        }
    };

    Ok((metadata, body.to_string()))
}

/// Renders metadata and a body as a front-matter file.
///
/// Empty metadata writes the body alone, so plain text files stay plain,
/// unless the body itself opens with a delimiter line. Such a body gets an
/// empty block in front so it is not read back as metadata.
pub fn join_front_matter(metadata: &Document, body: &str) -> QuarryResult<String> {
    if metadata.is_empty() {
        let opening = format!("{}\n", FRONT_MATTER_DELIMITER);
        if body.starts_with(&opening) {
            return Ok(format!("{opening}{opening}{body}", opening = opening, body = body));
        }
        return Ok(body.to_string());
    }
    let yaml = serde_yaml::to_string(metadata)?;
    Ok(format!(
        "{delimiter}\n{yaml}{delimiter}\n{body}",
        delimiter = FRONT_MATTER_DELIMITER,
        yaml = yaml,
        body = body
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    #[test]
    fn test_split_and_join() {
        let text = "---\ntitle: Hello\ntags:\n- a\n- b\n---\n# Body\n\ntext\n";
        let (metadata, body) = split_front_matter(text).unwrap();
        assert_eq!(metadata, doc! { title: "Hello", tags: ["a", "b"] });
        assert_eq!(body, "# Body\n\ntext\n");
        assert_eq!(join_front_matter(&metadata, &body).unwrap(), text);
    }

    #[test]
    fn test_no_front_matter() {
        let (metadata, body) = split_front_matter("just text").unwrap();
        assert!(metadata.is_empty());
        assert_eq!(body, "just text");
        assert_eq!(join_front_matter(&metadata, &body).unwrap(), "just text");
    }

    #[test]
    fn test_empty_block() {
        let (metadata, body) = split_front_matter("---\n---\nbody").unwrap();
        assert!(metadata.is_empty());
        assert_eq!(body, "body");
    }

    #[test]
    fn test_body_starting_with_delimiter_survives() {
        let body = "---\ntitle: injected\n---\nrest\n";
        let text = join_front_matter(&Document::new(), body).unwrap();
        assert_eq!(text, "---\n---\n---\ntitle: injected\n---\nrest\n");

        let (metadata, read_back) = split_front_matter(&text).unwrap();
        assert!(metadata.is_empty());
        assert_eq!(read_back, body);
    }

    #[test]
    fn test_unclosed_block_fails() {
        let err = split_front_matter("---\ntitle: x\nbody").unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::EncodingError);
    }

    #[test]
    fn test_non_mapping_fails() {
        assert!(split_front_matter("---\n- a\n---\n").is_err());
    }
}
