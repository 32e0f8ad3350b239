//! Parses the whitespace-split command table from spec.md §4.6.

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Exit,
    GetFile(String),
    AddFile(String),
    ModifyFile(String),
    UpdateFile(String),
    TestResponse { dest: u32, count: u32 },
    PrintFiles,
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("unknown command {0:?}")]
    Unknown(String),
    #[error("{0} expects a filename argument")]
    MissingFilename(&'static str),
    #[error("testresponse expects a numeric destination and count")]
    BadTestResponseArgs,
}

pub fn parse(line: &str) -> Result<Option<Command>, CommandError> {
    let mut parts = line.split_whitespace();
    let Some(verb) = parts.next() else {
        return Ok(None);
    };
    let command = match verb {
        "exit" => Command::Exit,
        "getfile" => Command::GetFile(
            parts
                .next()
                .ok_or(CommandError::MissingFilename("getfile"))?
                .to_string(),
        ),
        "addfile" => Command::AddFile(
            parts
                .next()
                .ok_or(CommandError::MissingFilename("addfile"))?
                .to_string(),
        ),
        "modifyfile" => Command::ModifyFile(
            parts
                .next()
                .ok_or(CommandError::MissingFilename("modifyfile"))?
                .to_string(),
        ),
        "updatefile" => Command::UpdateFile(
            parts
                .next()
                .ok_or(CommandError::MissingFilename("updatefile"))?
                .to_string(),
        ),
        "testresponse" => {
            let dest: u32 = parts
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or(CommandError::BadTestResponseArgs)?;
            let count: u32 = parts
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or(CommandError::BadTestResponseArgs)?;
            Command::TestResponse { dest, count }
        }
        "printfiles" => Command::PrintFiles,
        other => return Err(CommandError::Unknown(other.to_string())),
    };
    Ok(Some(command))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_each_verb() {
        assert_eq!(parse("exit").unwrap(), Some(Command::Exit));
        assert_eq!(
            parse("getfile x.txt").unwrap(),
            Some(Command::GetFile("x.txt".to_string()))
        );
        assert_eq!(
            parse("testresponse 3 5").unwrap(),
            Some(Command::TestResponse { dest: 3, count: 5 })
        );
        assert_eq!(parse("printfiles").unwrap(), Some(Command::PrintFiles));
    }

    #[test]
    fn blank_line_is_not_an_error() {
        assert_eq!(parse("   ").unwrap(), None);
    }

    #[test]
    fn missing_filename_is_rejected() {
        assert!(matches!(
            parse("getfile"),
            Err(CommandError::MissingFilename("getfile"))
        ));
    }

    #[test]
    fn unknown_verb_is_rejected() {
        assert!(matches!(parse("frobnicate"), Err(CommandError::Unknown(_))));
    }

    #[test]
    fn testresponse_requires_two_numbers() {
        assert!(matches!(
            parse("testresponse 3"),
            Err(CommandError::BadTestResponseArgs)
        ));
        assert!(matches!(
            parse("testresponse a b"),
            Err(CommandError::BadTestResponseArgs)
        ));
    }
}
