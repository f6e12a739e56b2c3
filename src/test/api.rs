#[cfg(test)]
mod tests {
    use rocket::http::{ContentType, Status};
    use rocket::local::asynchronous::Client;
    use serde_json::{Value, json};

    use crate::models::{AddDataResponse, LoginResponse, MessageResponse};
    use crate::test::test_utils::{STANDARD_PASSWORD, create_standard_test_db, setup_test_client};
    use crate::validation::ErrorBody;

    const BOUNDARY: &str = "orchestra-test-boundary";

    async fn post_json(client: &Client, uri: &'static str, body: Value) -> (Status, String) {
        let response = client
            .post(uri)
            .header(ContentType::JSON)
            .body(body.to_string())
            .dispatch()
            .await;
        let status = response.status();
        (status, response.into_string().await.unwrap_or_default())
    }

    fn error_message(body: &str) -> String {
        serde_json::from_str::<ErrorBody>(body)
            .expect("Error responses should be JSON")
            .error
    }

    fn multipart_upload(field: &str, file_name: &str, contents: &[u8]) -> Vec<u8> {
        let mut body = format!(
            "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/zip\r\n\r\n",
            BOUNDARY, field, file_name
        )
        .into_bytes();
        body.extend_from_slice(contents);
        body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
        body
    }

    fn multipart_type() -> ContentType {
        ContentType::new("multipart", "form-data").with_params(("boundary", BOUNDARY))
    }

    #[rocket::async_test]
    async fn test_root_and_health() {
        let (client, _test_db) = setup_test_client(create_standard_test_db().await).await;

        let response = client.get("/").dispatch().await;
        assert_eq!(response.status(), Status::Ok);

        let response = client.get("/api/health").dispatch().await;
        assert_eq!(response.status(), Status::Ok);
        assert_eq!(response.into_string().await.unwrap(), "OK");

        let response = client.get("/api/no_such_endpoint").dispatch().await;
        assert_eq!(response.status(), Status::NotFound);
        let body = response.into_string().await.unwrap();
        assert_eq!(error_message(&body), "Resource not found");
    }

    #[rocket::async_test]
    async fn test_login_api() {
        let (client, _test_db) = setup_test_client(create_standard_test_db().await).await;

        let (status, body) = post_json(
            &client,
            "/api/login",
            json!({"username": "conductor", "password": STANDARD_PASSWORD}),
        )
        .await;
        assert_eq!(status, Status::Ok);
        let login: LoginResponse = serde_json::from_str(&body).unwrap();
        assert!(login.success);
        assert_eq!(login.user["username"], json!("conductor"));
        assert!(!login.user.contains_key("password"));

        let (status, body) = post_json(
            &client,
            "/api/login",
            json!({"username": "conductor", "password": "wrong_password"}),
        )
        .await;
        assert_eq!(status, Status::Unauthorized);
        assert_eq!(error_message(&body), "Invalid username or password");

        let (status, _) = post_json(&client, "/api/login", json!({"username": "conductor"})).await;
        assert_eq!(status, Status::BadRequest);

        let (status, _) = post_json(
            &client,
            "/api/login",
            json!({"username": "", "password": STANDARD_PASSWORD}),
        )
        .await;
        assert_eq!(status, Status::BadRequest);
    }

    #[rocket::async_test]
    async fn test_list_endpoints() {
        let (client, _test_db) = setup_test_client(create_standard_test_db().await).await;

        let expected = [
            ("/api/students", 3),
            ("/api/sections", 2),
            ("/api/rehearsals", 2),
            ("/api/section_students", 3),
            ("/api/attendance", 0),
        ];

        for (uri, rows) in expected {
            let response = client.get(uri).dispatch().await;
            assert_eq!(response.status(), Status::Ok, "{} failed", uri);

            let body = response.into_string().await.unwrap();
            let list: Vec<Value> = serde_json::from_str(&body).unwrap();
            assert_eq!(list.len(), rows, "{} returned the wrong row count", uri);
        }
    }

    #[rocket::async_test]
    async fn test_attendance_submission_scenario() {
        let (client, test_db) = setup_test_client(create_standard_test_db().await).await;

        let (status, body) = post_json(
            &client,
            "/api/attendance",
            json!({
                "records": [
                    {"rehearsal_id": 5, "student_id": 1, "status": "present"},
                    {"rehearsal_id": 5, "student_id": 2, "status": "absent"}
                ],
                "marked_by": "conductor"
            }),
        )
        .await;
        assert_eq!(status, Status::Ok);
        let saved: MessageResponse = serde_json::from_str(&body).unwrap();
        assert!(saved.success);
        assert_eq!(saved.message, "Successfully saved 2 records (version 1).");

        let (status, body) = post_json(
            &client,
            "/api/attendance",
            json!({
                "records": [
                    {"rehearsal_id": "5", "student_id": "1", "status": "late", "memo": "bus"},
                    {"rehearsal_id": "5", "student_id": "2", "status": "present"}
                ]
            }),
        )
        .await;
        assert_eq!(status, Status::Ok);
        let saved: MessageResponse = serde_json::from_str(&body).unwrap();
        assert_eq!(saved.message, "Successfully saved 2 records (version 2).");

        assert_eq!(test_db.count("attendance").await, 4);
        let unknown_marker: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM attendance WHERE marked_by = 'Unknown'")
                .fetch_one(&test_db.pool)
                .await
                .unwrap();
        assert_eq!(unknown_marker, 2);
    }

    #[rocket::async_test]
    async fn test_attendance_rejects_bad_payloads() {
        let (client, test_db) = setup_test_client(create_standard_test_db().await).await;

        let (status, body) =
            post_json(&client, "/api/attendance", json!({"records": [], "marked_by": "t"})).await;
        assert_eq!(status, Status::BadRequest);
        assert_eq!(error_message(&body), "No records provided");

        let (status, _) = post_json(
            &client,
            "/api/attendance",
            json!({"records": [{"rehearsal_id": "five", "student_id": 1, "status": "present"}]}),
        )
        .await;
        assert_eq!(status, Status::BadRequest);

        let response = client
            .post("/api/attendance")
            .header(ContentType::JSON)
            .body("{not json")
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::BadRequest);

        assert_eq!(test_db.count("attendance").await, 0);
    }

    #[rocket::async_test]
    async fn test_client_errors_explain_themselves() {
        let (client, _test_db) = setup_test_client(create_standard_test_db().await).await;

        let (status, body) =
            post_json(&client, "/api/login", json!({"username": "conductor"})).await;
        assert_eq!(status, Status::BadRequest);
        assert_eq!(error_message(&body), "Missing or invalid fields: password");

        let (status, body) = post_json(&client, "/api/login", json!({})).await;
        assert_eq!(status, Status::BadRequest);
        assert_eq!(
            error_message(&body),
            "Missing or invalid fields: password, username"
        );

        let (status, body) =
            post_json(&client, "/api/attendance", json!({"records": "everyone"})).await;
        assert_eq!(status, Status::BadRequest);
        assert_eq!(error_message(&body), "Missing required payload data");

        let response = client
            .post("/api/attendance")
            .header(ContentType::JSON)
            .body("{not json")
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::BadRequest);
        let body = response.into_string().await.unwrap();
        assert_eq!(error_message(&body), "Bad request");
    }

    #[rocket::async_test]
    async fn test_update_data() {
        let (client, _test_db) = setup_test_client(create_standard_test_db().await).await;

        let (status, body) = post_json(
            &client,
            "/api/update_data",
            json!({
                "filename": "students.csv",
                "primary_key_col": "student_id",
                "record": {"student_id": "1", "name": "Kim Minji", "status": "inactive"}
            }),
        )
        .await;
        assert_eq!(status, Status::Ok);
        let updated: MessageResponse = serde_json::from_str(&body).unwrap();
        assert_eq!(updated.message, "Successfully updated record in students");

        let (status, body) = post_json(
            &client,
            "/api/update_data",
            json!({
                "filename": "students.csv",
                "primary_key_col": "student_id",
                "record": {"student_id": 77, "status": "inactive"}
            }),
        )
        .await;
        assert_eq!(status, Status::NotFound);
        assert_eq!(
            error_message(&body),
            "Record to update not found or data unchanged"
        );

        let (status, body) = post_json(
            &client,
            "/api/update_data",
            json!({"filename": "students.csv", "record": {"student_id": 1}}),
        )
        .await;
        assert_eq!(status, Status::BadRequest);
        assert_eq!(error_message(&body), "Missing required payload data");
    }

    #[rocket::async_test]
    async fn test_injection_attempts_are_client_errors() {
        let (client, test_db) = setup_test_client(create_standard_test_db().await).await;

        let (status, _) = post_json(
            &client,
            "/api/update_data",
            json!({
                "filename": "students; DROP TABLE students.csv",
                "primary_key_col": "student_id",
                "record": {"student_id": 1, "status": "x"}
            }),
        )
        .await;
        assert_eq!(status, Status::BadRequest);

        let (status, _) = post_json(
            &client,
            "/api/delete_data",
            json!({
                "filename": "students.csv",
                "primary_key_col": "student_id OR 1=1",
                "primary_key_val": 1
            }),
        )
        .await;
        assert_eq!(status, Status::BadRequest);

        assert_eq!(test_db.count("students").await, 3);
    }

    #[rocket::async_test]
    async fn test_delete_data() {
        let (client, test_db) = setup_test_client(create_standard_test_db().await).await;

        let request = json!({
            "filename": "rehearsals.csv",
            "primary_key_col": "rehearsal_id",
            "primary_key_val": "6"
        });

        let (status, body) = post_json(&client, "/api/delete_data", request.clone()).await;
        assert_eq!(status, Status::Ok);
        let deleted: MessageResponse = serde_json::from_str(&body).unwrap();
        assert_eq!(deleted.message, "Successfully deleted record from rehearsals");
        assert_eq!(test_db.count("rehearsals").await, 1);

        let (status, body) = post_json(&client, "/api/delete_data", request).await;
        assert_eq!(status, Status::NotFound);
        assert_eq!(error_message(&body), "Record to delete not found");

        let (status, _) = post_json(
            &client,
            "/api/delete_data",
            json!({"filename": "rehearsals.csv", "primary_key_col": "rehearsal_id"}),
        )
        .await;
        assert_eq!(status, Status::BadRequest);
    }

    #[rocket::async_test]
    async fn test_add_data() {
        let (client, test_db) = setup_test_client(create_standard_test_db().await).await;

        let (status, body) = post_json(
            &client,
            "/api/add_data",
            json!({
                "filename": "students.csv",
                "record": {
                    "name": "Choi Yuna",
                    "contact": "010-5555-6666",
                    "join_date": "2024-09-01",
                    "status": "active",
                    "section_id": "2",
                    "student_id": 1
                }
            }),
        )
        .await;
        assert_eq!(status, Status::Ok);
        let added: AddDataResponse = serde_json::from_str(&body).unwrap();
        let new_record = added.new_record.expect("New record should be returned");
        assert_eq!(new_record["student_id"], json!(4));
        assert_eq!(new_record["name"], json!("Choi Yuna"));
        assert_eq!(test_db.count("section_students").await, 4);

        let (status, body) = post_json(
            &client,
            "/api/add_data",
            json!({
                "filename": "rehearsals.csv",
                "record": {"date": "2024-06-01", "location": "Main Hall"}
            }),
        )
        .await;
        assert_eq!(status, Status::Ok);
        let added: AddDataResponse = serde_json::from_str(&body).unwrap();
        let new_record = added.new_record.expect("New record should be returned");
        assert_eq!(new_record["rehearsal_id"], json!(7));
        assert_eq!(new_record["description"], Value::Null);

        let (status, body) = post_json(
            &client,
            "/api/add_data",
            json!({"filename": "users.csv", "record": {"username": "intruder"}}),
        )
        .await;
        assert_eq!(status, Status::BadRequest);
        assert_eq!(error_message(&body), "Invalid filename for add operation");

        let (status, _) = post_json(
            &client,
            "/api/add_data",
            json!({"filename": "students.csv", "record": {"name": "X", "section_id": "two"}}),
        )
        .await;
        assert_eq!(status, Status::BadRequest);
        assert_eq!(test_db.count("students").await, 4);
    }

    #[rocket::async_test]
    async fn test_add_student_with_section_zero_has_no_mapping() {
        let (client, test_db) = setup_test_client(create_standard_test_db().await).await;

        for section_id in [json!(0), json!("0"), json!("")] {
            let (status, _) = post_json(
                &client,
                "/api/add_data",
                json!({
                    "filename": "students.csv",
                    "record": {"name": "Jung Hoseok", "status": "active", "section_id": section_id}
                }),
            )
            .await;
            assert_eq!(status, Status::Ok, "section_id {} failed", section_id);
        }

        assert_eq!(test_db.count("students").await, 6);
        assert_eq!(test_db.count("section_students").await, 3);
    }

    #[rocket::async_test]
    async fn test_export_then_import_over_http() {
        let (client, test_db) = setup_test_client(create_standard_test_db().await).await;

        let response = client.get("/api/export_csv").dispatch().await;
        assert_eq!(response.status(), Status::Ok);
        assert_eq!(response.content_type(), Some(ContentType::ZIP));
        let disposition = response
            .headers()
            .get_one("Content-Disposition")
            .map(String::from)
            .unwrap();
        assert!(disposition.contains("orchestra_data.zip"));
        let archive = response.into_bytes().await.unwrap();

        sqlx::query("DELETE FROM students")
            .execute(&test_db.pool)
            .await
            .unwrap();

        let response = client
            .post("/api/import_csv")
            .header(multipart_type())
            .body(multipart_upload("file", "orchestra_data.zip", &archive))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        let body = response.into_string().await.unwrap();
        let imported: MessageResponse = serde_json::from_str(&body).unwrap();
        assert_eq!(imported.message, "Data imported successfully.");

        assert_eq!(test_db.count("students").await, 3);
    }

    #[rocket::async_test]
    async fn test_import_rejects_bad_uploads() {
        let (client, test_db) = setup_test_client(create_standard_test_db().await).await;

        let response = client
            .post("/api/import_csv")
            .header(multipart_type())
            .body(multipart_upload("file", "students.csv", b"student_id,name\n9,X\n"))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::BadRequest);
        let body = response.into_string().await.unwrap();
        assert_eq!(
            error_message(&body),
            "Invalid file type, please upload a .zip file"
        );

        let response = client
            .post("/api/import_csv")
            .header(multipart_type())
            .body(multipart_upload("file", "fake.zip", b"definitely not a zip"))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::BadRequest);

        let response = client
            .post("/api/import_csv")
            .header(multipart_type())
            .body(multipart_upload("attachment", "data.zip", b"PK"))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::BadRequest);
        let body = response.into_string().await.unwrap();
        assert_eq!(error_message(&body), "No file part in the request");

        assert_eq!(test_db.count("students").await, 3);
    }
}
