//! Self-correction loop tests.
//!
//! Drives the correction machine with real envelopes from the executor, both
//! directly and through a chat session with a scripted generator.

use sqlguard::correction::{
    CorrectionAction, CorrectionMachine, DiagnosticCategory, Phase, MAX_RETRIES,
};
use sqlguard::db::{DriverError, MockBackend, RawResultSet, Value};
use sqlguard::error::ErrorKind;
use sqlguard::llm::{ChatSession, MockGenerator, Role, TurnStatus};
use sqlguard::query::QueryExecutor;
use sqlguard::safety::ValidationPolicy;
use std::sync::Arc;

fn missing_table() -> DriverError {
    DriverError::database(Some("42P01"), "relation \"custmers\" does not exist")
}

fn executor(backend: Arc<MockBackend>) -> QueryExecutor {
    QueryExecutor::new(backend, Arc::new(ValidationPolicy::new("public", 100)))
}

#[tokio::test]
async fn test_retry_counts_then_give_up() {
    let mut backend = MockBackend::new();
    for _ in 0..4 {
        backend = backend.then_err(missing_table());
    }
    let executor = executor(Arc::new(backend));
    let mut machine = CorrectionMachine::new();
    machine.begin_request();

    for expected in 1..=MAX_RETRIES {
        let sql = "SELECT * FROM custmers";
        machine.dispatch(sql);
        let json = executor.execute(sql).await.to_json().unwrap();

        match machine.observe_json(&json) {
            CorrectionAction::Retry(diagnostic) => {
                assert_eq!(diagnostic.attempt, expected);
                assert_eq!(diagnostic.category, DiagnosticCategory::TableNotFound);
                assert_eq!(diagnostic.missing_identifier.as_deref(), Some("custmers"));
            }
            other => panic!("expected retry {}, got {:?}", expected, other),
        }
        assert_eq!(machine.state().retry_count, expected);
        assert_eq!(machine.state().last_error, Some(ErrorKind::NotFound));
    }

    machine.dispatch("SELECT * FROM custmers");
    let envelope = executor.execute("SELECT * FROM custmers").await;
    let CorrectionAction::GiveUp(message) = machine.observe(&envelope) else {
        panic!("expected give up on the fourth failure");
    };

    assert!(message.contains("Do not send another query"));
    assert!(message.contains("custmers"));
    assert_eq!(machine.state().retry_count, MAX_RETRIES);
    assert_eq!(machine.phase(), Phase::Idle);
}

#[tokio::test]
async fn test_success_after_failure_resets() {
    let backend = Arc::new(MockBackend::with_rows(1).then_err(missing_table()));
    let executor = executor(backend);
    let mut machine = CorrectionMachine::new();
    machine.begin_request();

    machine.dispatch("SELECT * FROM custmers");
    let failed = executor.execute("SELECT * FROM custmers").await;
    assert!(matches!(machine.observe(&failed), CorrectionAction::Retry(_)));

    machine.dispatch("SELECT * FROM customers");
    let fixed = executor.execute("SELECT * FROM customers").await;
    assert_eq!(machine.observe(&fixed), CorrectionAction::Completed);
    assert_eq!(machine.state().retry_count, 0);
    assert!(!machine.state().needs_correction);
}

#[tokio::test]
async fn test_policy_rejection_counts_as_failure() {
    let executor = executor(Arc::new(MockBackend::new()));
    let mut machine = CorrectionMachine::new();
    machine.begin_request();

    machine.dispatch("DELETE FROM users");
    let envelope = executor.execute("DELETE FROM users").await;
    let CorrectionAction::Retry(diagnostic) = machine.observe(&envelope) else {
        panic!("expected retry");
    };
    assert!(diagnostic.message.contains("FORBIDDEN_STATEMENT_TYPE"));
    assert_eq!(machine.state().retry_count, 1);
}

#[tokio::test]
async fn test_session_recovers_within_budget() {
    let generator = Arc::new(
        MockGenerator::new()
            .then_sql("SELECT * FROM custmers")
            .then_sql("SELECT * FROM customer")
            .then_reply("Here are the customers.\n```sql\nSELECT * FROM customers\n```"),
    );
    let backend = Arc::new(
        MockBackend::with_rows(3)
            .then_err(missing_table())
            .then_err(DriverError::database(
                Some("42P01"),
                "relation \"customer\" does not exist",
            )),
    );
    let mut chat = ChatSession::new(generator.clone(), executor(backend.clone()));

    let outcome = chat.ask("who are our customers?").await.unwrap();

    assert_eq!(outcome.status, TurnStatus::Answered);
    assert_eq!(outcome.attempts, 3);
    assert_eq!(outcome.answer, "Here are the customers.");
    assert_eq!(outcome.envelope.unwrap().data().unwrap().row_count, 3);
    assert_eq!(backend.requests().len(), 3);

    let feedback: Vec<String> = generator
        .received()
        .last()
        .unwrap()
        .iter()
        .filter(|m| m.role == Role::User)
        .map(|m| m.content.clone())
        .collect();
    assert_eq!(feedback.len(), 3);
    assert!(feedback[1].contains("retry 1 of 3"));
    assert!(feedback[2].contains("retry 2 of 3"));
}

#[tokio::test]
async fn test_session_stops_querying_after_give_up() {
    let mut generator = MockGenerator::new();
    for _ in 0..6 {
        generator = generator.then_sql("SELECT * FROM custmers");
    }
    let generator = Arc::new(generator);
    let mut backend = MockBackend::new();
    for _ in 0..6 {
        backend = backend.then_err(missing_table());
    }
    let backend = Arc::new(backend);
    let mut chat = ChatSession::new(generator, executor(backend.clone()));

    let outcome = chat.ask("show custmers").await.unwrap();

    assert_eq!(outcome.status, TurnStatus::GaveUp);
    assert_eq!(outcome.attempts, MAX_RETRIES + 1);
    assert_eq!(backend.requests().len(), (MAX_RETRIES + 1) as usize);
}

#[tokio::test]
async fn test_each_question_gets_a_fresh_budget() {
    let mut generator = MockGenerator::new();
    let mut backend = MockBackend::new();
    for _ in 0..2 {
        for _ in 0..3 {
            generator = generator.then_sql("SELECT * FROM custmers");
            backend = backend.then_err(missing_table());
        }
        generator = generator.then_sql("SELECT * FROM customers");
        backend = backend.then_ok(RawResultSet::with_data(
            vec!["id".to_string()],
            vec![vec![Value::Int(1)]],
        ));
    }
    let generator = Arc::new(generator);
    let backend = Arc::new(backend);
    let mut chat = ChatSession::new(generator.clone(), executor(backend.clone()));

    for question in ["first question", "second question"] {
        let outcome = chat.ask(question).await.unwrap();
        assert_eq!(outcome.status, TurnStatus::Answered, "{}", question);
        assert_eq!(outcome.attempts, 4);
        assert_eq!(outcome.envelope.unwrap().data().unwrap().row_count, 1);
    }
    assert_eq!(backend.requests().len(), 8);

    let first_retries = generator
        .received()
        .iter()
        .filter_map(|call| call.last())
        .filter(|m| m.role == Role::User && m.content.contains("retry 1 of 3"))
        .count();
    assert_eq!(first_retries, 2);
}
