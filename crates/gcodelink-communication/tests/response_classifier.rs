//! Response classification against the default and custom vocabularies

use gcodelink_communication::{ResponseClassifier, ResponseKind};
use gcodelink_settings::ResponseVocabulary;

#[test]
fn test_default_vocabulary() {
    let c = ResponseClassifier::default();
    let cases = [
        ("ok", ResponseKind::Acknowledged),
        ("ok T:200 /200 B:60 /60", ResponseKind::TemperatureAck),
        ("T:200 /200", ResponseKind::TemperatureReport),
        ("start", ResponseKind::Online),
        ("Grbl 1.1h ['$' for help]", ResponseKind::Online),
        ("Error:Line Number is not Last Line Number+1", ResponseKind::Error),
        ("DEBUG_ECHO", ResponseKind::Debug),
        ("rs 5", ResponseKind::ResendRequest),
        ("Resend: 12", ResponseKind::ResendRequest),
        ("", ResponseKind::Invalid),
        ("echo:busy", ResponseKind::Invalid),
    ];
    for (line, kind) in cases {
        assert_eq!(c.classify(Some(line)), kind, "line {:?}", line);
    }
    assert_eq!(c.classify(None), ResponseKind::Invalid);
}

#[test]
fn test_resend_line_numbers() {
    let c = ResponseClassifier::default();
    assert_eq!(c.extract_resend_line_number("rs 5"), Some(5));
    assert_eq!(c.extract_resend_line_number("Resend: 12"), Some(12));
    assert_eq!(c.extract_resend_line_number("rs N7"), Some(7));
    assert_eq!(c.extract_resend_line_number("RS N:8 extra"), Some(8));
    assert_eq!(c.extract_resend_line_number("resend"), None);
    assert_eq!(c.extract_resend_line_number("ok"), None);
}

#[test]
fn test_acks_and_resends_clear_to_send() {
    assert!(ResponseKind::Acknowledged.clears_to_send());
    assert!(ResponseKind::TemperatureAck.clears_to_send());
    assert!(ResponseKind::ResendRequest.clears_to_send());
    assert!(!ResponseKind::TemperatureReport.clears_to_send());
    assert!(!ResponseKind::Error.clears_to_send());
    assert!(!ResponseKind::Invalid.clears_to_send());
}

#[test]
fn test_custom_vocabulary() {
    let vocabulary = ResponseVocabulary {
        good: vec!["OK".to_string(), "done".to_string()],
        online: vec!["ready".to_string()],
        temperature: vec!["temp=".to_string()],
        ..ResponseVocabulary::default()
    };
    let c = ResponseClassifier::new(vocabulary);
    assert_eq!(c.classify(Some("done")), ResponseKind::Acknowledged);
    assert_eq!(c.classify(Some("OK temp=210")), ResponseKind::TemperatureAck);
    assert_eq!(c.classify(Some("ready")), ResponseKind::Online);
    assert_eq!(c.classify(Some("ok")), ResponseKind::Invalid);
    assert_eq!(c.classify(Some("start")), ResponseKind::Invalid);
}
