mod test_support;

use serde_json::json;
use test_support::{error_code, request_err, request_ok, row_ids, select_seeded_workspace, spawn_sidecar};

#[test]
fn course_is_required_and_must_exist() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _workspace = select_seeded_workspace(&mut stdin, &mut reader, "learneractivity-course-required");

    for (i, params) in [json!({}), json!({ "course": null }), json!({ "course": 0 })]
        .into_iter()
        .enumerate()
    {
        let e = request_err(
            &mut stdin,
            &mut reader,
            &format!("r{}", i),
            "report.learnerActivity",
            params,
        );
        assert_eq!(error_code(&e), "bad_params");
        assert_eq!(e["message"], "course is required");
    }

    let e = request_err(
        &mut stdin,
        &mut reader,
        "missing",
        "report.learnerActivity",
        json!({ "course": 404 }),
    );
    assert_eq!(error_code(&e), "not_found");
    let e = request_err(&mut stdin, &mut reader, "count", "report.count", json!({ "course": 404 }));
    assert_eq!(error_code(&e), "not_found");
}

#[test]
fn sort_and_page_size_are_validated() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _workspace = select_seeded_workspace(&mut stdin, &mut reader, "learneractivity-validation");

    let e = request_err(
        &mut stdin,
        &mut reader,
        "1",
        "report.learnerActivity",
        json!({ "course": 10, "sort": { "field": "group" } }),
    );
    assert_eq!(error_code(&e), "bad_params");

    let e = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "report.learnerActivity",
        json!({ "course": 10, "sort": { "field": "email", "direction": "sideways" } }),
    );
    assert_eq!(error_code(&e), "bad_params");

    let e = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "report.learnerActivity",
        json!({ "course": 10, "perpage": 0 }),
    );
    assert_eq!(error_code(&e), "bad_params");

    let e = request_err(
        &mut stdin,
        &mut reader,
        "3b",
        "report.learnerActivity",
        json!({ "course": 10, "page": 4611686018427387904_i64, "perpage": 3 }),
    );
    assert_eq!(error_code(&e), "bad_params");
    assert_eq!(e["message"], "page is out of range");

    let wildcard = request_ok(
        &mut stdin,
        &mut reader,
        "3c",
        "report.count",
        json!({ "course": 10, "institution": "%" }),
    );
    assert_eq!(wildcard["totalCount"], 0);

    let sorted = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "report.learnerActivity",
        json!({ "course": 10, "sort": { "field": "email", "direction": "DESC" } }),
    );
    assert_eq!(row_ids(&sorted), vec![3, 2, 1]);
}

#[test]
fn group_and_institution_filters_narrow_count_and_rows_together() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _workspace = select_seeded_workspace(&mut stdin, &mut reader, "learneractivity-filters");

    let cases = [
        (json!({ "course": 10 }), vec![2, 3, 1]),
        (json!({ "course": 10, "group": 101 }), vec![2, 1]),
        (json!({ "course": 10, "group": "100" }), vec![1]),
        (json!({ "course": 10, "institution": "North" }), vec![3, 1]),
        (json!({ "course": 10, "group": 101, "institution": "South" }), vec![2]),
        (json!({ "course": 10, "group": 100, "institution": "South" }), vec![]),
        (json!({ "course": 10, "group": 0, "institution": "" }), vec![2, 3, 1]),
        (json!({ "course": 10, "group": 999 }), vec![]),
    ];
    for (i, (params, expected)) in cases.into_iter().enumerate() {
        let count = request_ok(
            &mut stdin,
            &mut reader,
            &format!("c{}", i),
            "report.count",
            params.clone(),
        );
        assert_eq!(count["totalCount"], expected.len() as i64, "count for {}", params);

        let report = request_ok(
            &mut stdin,
            &mut reader,
            &format!("r{}", i),
            "report.learnerActivity",
            params.clone(),
        );
        assert_eq!(row_ids(&report), expected, "rows for {}", params);
        assert_eq!(report["totalCount"], count["totalCount"]);
    }
}
