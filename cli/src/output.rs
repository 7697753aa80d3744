use cardloop::{ErrorRecord, SessionEvent};

/// Renders the event for a terminal.
pub fn describe(event: &SessionEvent) -> String {
    match event {
        SessionEvent::StateChanged(state) => format!("state: {:?}", state),
        SessionEvent::CardInserted => "card inserted".to_owned(),
        SessionEvent::CardRemoved => "card removed".to_owned(),
        SessionEvent::Polled(report) => format!(
            "#{} uid={} ndef={}",
            report.iteration,
            report.info,
            match report.message.is_empty() {
                true => "(empty)".to_owned(),
                _ => hex::encode_upper(&report.message),
            }
        ),
        SessionEvent::Provisioned(report) => format!(
            "wrote {} byte(s) in {} attempt(s), verified in {} attempt(s)",
            report.bytes, report.write_attempts, report.verify_attempts
        ),
        SessionEvent::Faulted(report) => report.to_string(),
        SessionEvent::Mismatch(report) => format!(
            "verify mismatch: wrote {}, read back {}",
            hex::encode_upper(&report.written),
            hex::encode_upper(&report.read_back)
        ),
        SessionEvent::ReaderFailed(record) => format!("reader failed: {}", record),
    }
}

/// Prints one event of the reader, either as text or as a JSON line.
pub fn print_event(reader: &str, event: &SessionEvent, json: bool) -> serde_json::Result<()> {
    match json {
        true => println!(
            "{}",
            serde_json::to_string(&serde_json::json!({ "reader": reader, "event": event }))?
        ),
        _ => println!("[{}] {}", reader, describe(event)),
    }

    Ok(())
}

/// Prints a catalog record as a table row.
pub fn print_record(record: &ErrorRecord) {
    println!(
        "{}  {:<5}  {:<32}  {}",
        record.code,
        match record.retryable {
            true => "retry",
            _ => "-",
        },
        record.symbolic_name,
        record.message
    );
}

#[cfg(test)]
mod tests {
    use cardloop::command::{FaultReport, Operation, PollReport, ProvisionReport};
    use cardloop::{CardInfo, ResultCode, SessionState};

    use super::*;

    #[test]
    fn test_describe_poll() {
        let event = SessionEvent::Polled(PollReport {
            iteration: 3,
            info: CardInfo {
                uid: vec![0x04, 0xA1, 0x0F],
            },
            message: vec![0xD1, 0x01],
        });

        assert_eq!("#3 uid=04A10F ndef=D101", describe(&event));
    }

    #[test]
    fn test_describe_empty_message() {
        let event = SessionEvent::Polled(PollReport {
            iteration: 1,
            info: CardInfo { uid: vec![0x04] },
            message: vec![],
        });

        assert_eq!("#1 uid=04 ndef=(empty)", describe(&event));
    }

    #[test]
    fn test_describe_fault() {
        let event = SessionEvent::Faulted(FaultReport {
            operation: Operation::Query,
            record: ResultCode::SHARING_VIOLATION.record().unwrap(),
            attempts: 3,
        });

        assert_eq!(
            "query failed after 3 attempt(s): SCARD_E_SHARING_VIOLATION (0x8010000B): \
             The smart card cannot be accessed because of other connections outstanding.",
            describe(&event)
        );
    }

    #[test]
    fn test_describe_misc() {
        assert_eq!(
            "state: WaitingForCard",
            describe(&SessionEvent::StateChanged(SessionState::WaitingForCard))
        );
        assert_eq!(
            "wrote 4 byte(s) in 2 attempt(s), verified in 1 attempt(s)",
            describe(&SessionEvent::Provisioned(ProvisionReport {
                bytes: 4,
                write_attempts: 2,
                verify_attempts: 1,
            }))
        );
    }

    #[test]
    fn test_describe_reader_failure() {
        let event = SessionEvent::ReaderFailed(ResultCode(0x8010_0017).record().unwrap());

        assert_eq!(
            "reader failed: SCARD_E_READER_UNAVAILABLE (0x80100017): \
             The specified reader is not currently available for use.",
            describe(&event)
        );
    }
}
