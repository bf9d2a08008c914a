mod common;

use assert_matches::assert_matches;
use bookstore_backoffice::{
    entities::FeedbackType,
    errors::ServiceError,
    services::{feedback::SubmitFeedbackRequest, students::CreateStudentRequest},
};
use common::TestApp;
use rstest::rstest;

fn feedback(student_id: i32, feedback_type: FeedbackType, message: &str) -> SubmitFeedbackRequest {
    SubmitFeedbackRequest {
        student_id,
        feedback_type,
        message: message.to_string(),
        can_contact: false,
    }
}

#[tokio::test]
async fn students_are_registered_once() {
    let app = TestApp::new().await;
    let students = &app.services.students;

    let created = students
        .create_student(CreateStudentRequest {
            name: " Mara Velasco ".to_string(),
            email: "Mara.Velasco@campus.test".to_string(),
            student_number: "2021-00451".to_string(),
        })
        .await
        .expect("register");
    assert_eq!(created.name, "Mara Velasco");
    assert_eq!(created.email, "mara.velasco@campus.test");
    assert_eq!(students.get_student(created.id).await.expect("get"), created);

    let err = students
        .create_student(CreateStudentRequest {
            name: "Someone Else".to_string(),
            email: "mara.velasco@campus.test".to_string(),
            student_number: "2021-09999".to_string(),
        })
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Conflict(_));

    let err = students.get_student(77).await.unwrap_err();
    assert_matches!(err, ServiceError::NotFound(ref msg) if msg == "Student with ID 77 not found");
}

#[rstest]
#[case::blank_name("  ", "a@campus.test", "2021-1")]
#[case::bad_email("Nico", "not-an-email", "2021-2")]
#[case::blank_number("Nico", "nico@campus.test", " ")]
#[tokio::test]
async fn malformed_students_are_rejected(
    #[case] name: &str,
    #[case] email: &str,
    #[case] student_number: &str,
) {
    let app = TestApp::new().await;
    let err = app
        .services
        .students
        .create_student(CreateStudentRequest {
            name: name.to_string(),
            email: email.to_string(),
            student_number: student_number.to_string(),
        })
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidArgument(_));
}

#[tokio::test]
async fn feedback_is_listed_newest_first_with_student_names() {
    let app = TestApp::new().await;
    let olga = app.create_student("Olga Pineda").await;
    let paolo = app.create_student("Paolo Sy").await;
    let service = &app.services.feedback;

    let first = service
        .submit_feedback(SubmitFeedbackRequest {
            can_contact: true,
            ..feedback(olga.id, FeedbackType::Suggestion, " Stock more lab gowns in XS ")
        })
        .await
        .expect("submit");
    assert_eq!(first.status, "new");
    assert_eq!(first.feedback_type, "suggestion");
    assert_eq!(first.message, "Stock more lab gowns in XS");
    assert!(first.can_contact);
    assert_eq!(first.admin_notes, None);

    service
        .submit_feedback(feedback(paolo.id, FeedbackType::Bug, "Order page shows old prices"))
        .await
        .expect("submit");

    let entries = service.list_feedback().await.expect("list");
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].student_name, "Paolo Sy");
    assert_eq!(entries[0].feedback_type, "bug");
    assert_eq!(entries[1].student_name, "Olga Pineda");
}

#[tokio::test]
async fn feedback_requires_a_student_and_a_message() {
    let app = TestApp::new().await;
    let service = &app.services.feedback;

    let err = service
        .submit_feedback(feedback(404, FeedbackType::Other, "Hello"))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(ref msg) if msg == "Student with ID 404 not found");

    let student = app.create_student("Quin Lao").await;
    let err = service
        .submit_feedback(feedback(student.id, FeedbackType::Complaint, "   "))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidArgument(_));
    assert!(service.list_feedback().await.expect("list").is_empty());
}

#[tokio::test]
async fn staff_update_status_and_notes() {
    let app = TestApp::new().await;
    let student = app.create_student("Rafa Ong").await;
    let service = &app.services.feedback;
    let submitted = service
        .submit_feedback(feedback(student.id, FeedbackType::Feature, "Let us reserve books"))
        .await
        .expect("submit");

    let updated = service
        .update_status(submitted.id, "in_progress")
        .await
        .expect("status");
    assert_eq!(updated.status, "in_progress");
    assert!(updated.updated_at >= submitted.updated_at);

    let err = service.update_status(submitted.id, "archived").await.unwrap_err();
    assert_matches!(err, ServiceError::InvalidArgument(_));

    let noted = service
        .update_notes(submitted.id, Some("Planned for next term".to_string()))
        .await
        .expect("notes");
    assert_eq!(noted.admin_notes.as_deref(), Some("Planned for next term"));
    assert_eq!(noted.status, "in_progress");

    let cleared = service
        .update_notes(submitted.id, Some("  ".to_string()))
        .await
        .expect("clear");
    assert_eq!(cleared.admin_notes, None);

    for result in [
        service.update_status(999, "closed").await,
        service.update_notes(999, None).await,
    ] {
        assert_matches!(result, Err(ServiceError::NotFound(ref msg)) if msg == "Feedback not found");
    }
}
