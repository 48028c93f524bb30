//! Fixture-driven smoke test of the processing unit.
//!
//! A fixture directory holds `<stem>.{jpg,jpeg,png}` inputs next to
//! `results-<stem>.json` expectations. Every case runs, whatever the outcome
//! of the others. A run with no cases never passes.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::error::SelfTestError;
use crate::processing::ProcessingUnit;
use crate::service::FieldType;
use crate::tasks::model::{FieldMap, TaskData};

/// One fixture: named inputs and the outputs the unit must produce.
#[derive(Debug, Clone)]
pub struct FixtureCase {
    pub name: String,
    pub inputs: FieldMap,
    pub expected: FieldMap,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestResult {
    pub name: String,
    pub passed: bool,
}

/// Outcome of a self-test run, in case order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelfTestReport {
    pub results: Vec<TestResult>,
    pub all_passed: bool,
}

/// Output payload decoded for comparison.
#[derive(Debug, PartialEq)]
enum Decoded {
    Json(serde_json::Value),
    Text(String),
    Bytes(Vec<u8>),
}

impl Decoded {
    fn from_data(data: &TaskData) -> Self {
        match data.field_type() {
            Some(t) if t.is_json() => match serde_json::from_slice(&data.data) {
                Ok(value) => Self::Json(value),
                Err(_) => Self::Bytes(data.data.clone()),
            },
            Some(t) if t.is_text() => match String::from_utf8(data.data.clone()) {
                Ok(text) => Self::Text(text),
                Err(e) => Self::Bytes(e.into_bytes()),
            },
            _ => Self::Bytes(data.data.clone()),
        }
    }
}

pub struct SelfTestRunner {
    unit: Arc<dyn ProcessingUnit>,
    cases: Vec<FixtureCase>,
}

impl SelfTestRunner {
    pub fn new(unit: Arc<dyn ProcessingUnit>, cases: Vec<FixtureCase>) -> Self {
        Self { unit, cases }
    }

    pub fn cases(&self) -> &[FixtureCase] {
        &self.cases
    }

    /// Run every case and collect the results.
    pub fn run(&self) -> SelfTestReport {
        let results: Vec<TestResult> = self
            .cases
            .iter()
            .map(|case| TestResult {
                name: case.name.clone(),
                passed: self.run_case(case),
            })
            .collect();

        let all_passed = !results.is_empty() && results.iter().all(|r| r.passed);
        info!(
            cases = results.len(),
            failed = results.iter().filter(|r| !r.passed).count(),
            "Self-test finished"
        );
        SelfTestReport {
            results,
            all_passed,
        }
    }

    fn run_case(&self, case: &FixtureCase) -> bool {
        let outcome = catch_unwind(AssertUnwindSafe(|| self.unit.process(&case.inputs)));

        let outputs = match outcome {
            Ok(Ok(outputs)) => outputs,
            Ok(Err(e)) => {
                warn!(case = %case.name, error = %e, "Self-test case errored");
                return false;
            }
            Err(_) => {
                warn!(case = %case.name, "Self-test case panicked");
                return false;
            }
        };

        for (field, expected) in &case.expected {
            let Some(actual) = outputs.get(field) else {
                warn!(case = %case.name, field = %field, "Self-test output missing");
                return false;
            };
            if Decoded::from_data(actual) != Decoded::from_data(expected) {
                warn!(case = %case.name, field = %field, "Self-test output mismatch");
                return false;
            }
        }
        true
    }
}

/// Load fixture cases from `dir`, sorted by file name.
///
/// A missing directory or one without any complete case is an error.
pub fn discover(
    dir: &Path,
    input_field: &str,
    output_field: &str,
) -> Result<Vec<FixtureCase>, SelfTestError> {
    if !dir.is_dir() {
        return Err(SelfTestError::MissingFixtures(dir.display().to_string()));
    }

    let mut images: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file())
        .filter_map(|path| {
            let ext = path.extension()?.to_str()?.to_ascii_lowercase();
            let field_type = match ext.as_str() {
                "jpg" | "jpeg" => FieldType::ImageJpeg,
                "png" => FieldType::ImagePng,
                _ => return None,
            };
            Some((path, field_type))
        })
        .collect();
    images.sort_by(|a, b| a.0.file_name().cmp(&b.0.file_name()));

    let mut cases = Vec::with_capacity(images.len());
    for (path, field_type) in images {
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let expected_path = dir.join(format!("results-{stem}.json"));
        if !expected_path.is_file() {
            continue;
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| stem.to_string());

        let mut inputs = FieldMap::new();
        inputs.insert(
            input_field.to_string(),
            TaskData::new(std::fs::read(&path)?, field_type),
        );
        let mut expected = FieldMap::new();
        expected.insert(
            output_field.to_string(),
            TaskData::new(std::fs::read(&expected_path)?, FieldType::ApplicationJson),
        );

        cases.push(FixtureCase {
            name,
            inputs,
            expected,
        });
    }

    if cases.is_empty() {
        return Err(SelfTestError::NoCases(dir.display().to_string()));
    }
    Ok(cases)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::AverageShade;
    use crate::processing::average_shade::{INPUT_FIELD, OUTPUT_FIELD};
    use crate::testing::{FnUnit, encode_image, solid_image};

    fn png_case(name: &str, rgb: [u8; 3], expected: serde_json::Value) -> FixtureCase {
        let mut inputs = FieldMap::new();
        inputs.insert(
            INPUT_FIELD.to_string(),
            TaskData::new(
                encode_image(&solid_image(4, 4, rgb), image::ImageFormat::Png),
                FieldType::ImagePng,
            ),
        );
        let mut outputs = FieldMap::new();
        outputs.insert(OUTPUT_FIELD.to_string(), TaskData::json(&expected).unwrap());
        FixtureCase {
            name: name.to_string(),
            inputs,
            expected: outputs,
        }
    }

    #[test]
    fn collects_every_result() {
        let runner = SelfTestRunner::new(
            Arc::new(AverageShade::new()),
            vec![
                png_case("good", [1, 2, 3], serde_json::json!({"Red": 1, "Green": 2, "Blue": 3})),
                png_case("bad", [1, 2, 3], serde_json::json!({"Red": 9, "Green": 9, "Blue": 9})),
                png_case("also-good", [7, 7, 7], serde_json::json!({"Blue": 7, "Green": 7, "Red": 7})),
            ],
        );

        let report = runner.run();
        assert!(!report.all_passed);
        assert_eq!(
            report.results,
            vec![
                TestResult { name: "good".into(), passed: true },
                TestResult { name: "bad".into(), passed: false },
                TestResult { name: "also-good".into(), passed: true },
            ]
        );
    }

    #[test]
    fn panicking_case_fails_alone() {
        let unit = FnUnit::new(|inputs| {
            if inputs[INPUT_FIELD].data.is_empty() {
                panic!("empty fixture");
            }
            AverageShade.process(inputs)
        });
        let mut empty = png_case("empty", [0, 0, 0], serde_json::json!({}));
        empty.inputs.get_mut(INPUT_FIELD).unwrap().data.clear();

        let runner = SelfTestRunner::new(
            Arc::new(unit),
            vec![
                empty,
                png_case("fine", [5, 5, 5], serde_json::json!({"Red": 5, "Green": 5, "Blue": 5})),
            ],
        );

        let report = runner.run();
        assert!(!report.results[0].passed);
        assert!(report.results[1].passed);
        assert!(!report.all_passed);
    }

    #[test]
    fn run_without_cases_fails() {
        let runner = SelfTestRunner::new(Arc::new(AverageShade::new()), Vec::new());
        let report = runner.run();
        assert!(!report.all_passed);
        assert!(report.results.is_empty());
    }

    #[test]
    fn decoding_compares_json_by_value() {
        let a = TaskData::new(br#"{"Red":1,"Green":2}"#.to_vec(), FieldType::ApplicationJson);
        let b = TaskData::new(b"{ \"Green\": 2, \"Red\": 1 }".to_vec(), FieldType::ApplicationJson);
        assert_eq!(Decoded::from_data(&a), Decoded::from_data(&b));

        let text = TaskData::new(b"hello".to_vec(), FieldType::TextPlain);
        assert_eq!(Decoded::from_data(&text), Decoded::Text("hello".into()));
    }

    #[test]
    fn discover_pairs_images_with_results() {
        let dir = tempfile::tempdir().unwrap();
        let png = encode_image(&solid_image(2, 2, [10, 20, 30]), image::ImageFormat::Png);
        std::fs::write(dir.path().join("b.png"), &png).unwrap();
        std::fs::write(dir.path().join("a.png"), &png).unwrap();
        std::fs::write(dir.path().join("orphan.png"), &png).unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();
        let expected = br#"{"Red":10,"Green":20,"Blue":30}"#;
        std::fs::write(dir.path().join("results-a.json"), expected).unwrap();
        std::fs::write(dir.path().join("results-b.json"), expected).unwrap();

        let cases = discover(dir.path(), INPUT_FIELD, OUTPUT_FIELD).unwrap();
        let names: Vec<_> = cases.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["a.png", "b.png"]);
        assert_eq!(cases[0].inputs[INPUT_FIELD].content_type, "image/png");

        let report = SelfTestRunner::new(Arc::new(AverageShade::new()), cases).run();
        assert!(report.all_passed);
    }

    #[test]
    fn discover_missing_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = discover(&dir.path().join("nope"), INPUT_FIELD, OUTPUT_FIELD).unwrap_err();
        assert!(matches!(err, SelfTestError::MissingFixtures(_)));
    }

    #[test]
    fn discover_without_complete_cases_fails() {
        let dir = tempfile::tempdir().unwrap();
        let png = encode_image(&solid_image(2, 2, [1, 1, 1]), image::ImageFormat::Png);
        std::fs::write(dir.path().join("lonely.png"), &png).unwrap();

        let err = discover(dir.path(), INPUT_FIELD, OUTPUT_FIELD).unwrap_err();
        assert!(matches!(err, SelfTestError::NoCases(_)));
    }
}
