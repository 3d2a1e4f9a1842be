//! Form and input validation.
//!
//! Every validator takes its input by reference, never panics, and
//! accumulates all applicable errors in order instead of stopping at the
//! first. The same bounds are enforced again server-side; the copies here
//! exist to save a round trip and must match the server's exactly, or
//! users get contradictory rejection messages.

use crate::models::{CalculatorData, FoodDraft, Goals};

/// Outcome of a validation pass. Empty error list means valid.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub errors: Vec<String>,
}

impl ValidationReport {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn fail(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }
}

/// Parse a form field as a number, mapping anything unparsable to NaN so
/// range checks fail it without a separate error path.
fn number(raw: &str) -> f64 {
    raw.trim().parse().unwrap_or(f64::NAN)
}

/// Trim and HTML-escape the five characters `< > " ' &`.
///
/// Not idempotent: the ampersand introduced by an escape sequence is
/// itself re-escaped on a second pass. Callers sanitize exactly once, at
/// the point raw input enters the system.
#[must_use]
pub fn sanitize_string(input: &str) -> String {
    let trimmed = input.trim();
    let mut out = String::with_capacity(trimmed.len());
    for c in trimmed.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Validate a food form. The macro cross-check fires only when all four
/// numeric fields parsed and calories exceed 50: below that, rounding in
/// labelled data makes the 20% tolerance meaningless.
#[must_use]
pub fn validate_food(draft: &FoodDraft) -> ValidationReport {
    let mut report = ValidationReport::default();

    let name_len = draft.name.trim().chars().count();
    if !(2..=100).contains(&name_len) {
        report.fail("Food name must be between 2 and 100 characters");
    }

    let calories = number(&draft.calories);
    if !(0.0..=9000.0).contains(&calories) {
        report.fail("Calories must be a number between 0 and 9000");
    }
    let protein = number(&draft.protein);
    if !(0.0..=100.0).contains(&protein) {
        report.fail("Protein must be a number between 0 and 100 per 100 units");
    }
    let carbs = number(&draft.carbs);
    if !(0.0..=100.0).contains(&carbs) {
        report.fail("Carbs must be a number between 0 and 100 per 100 units");
    }
    let fat = number(&draft.fat);
    if !(0.0..=100.0).contains(&fat) {
        report.fail("Fat must be a number between 0 and 100 per 100 units");
    }

    let all_finite = [calories, protein, carbs, fat].iter().all(|v| v.is_finite());
    if all_finite && calories > 50.0 {
        let computed = protein * 4.0 + carbs * 4.0 + fat * 9.0;
        if (calories - computed).abs() > 0.20 * calories {
            report.fail(format!(
                "Calorie count doesn't match the macros (expected around {computed:.0} kcal)"
            ));
        }
    }

    report
}

/// Validate a raw portion-size field: a finite number, greater than zero,
/// at most 10000. Note `"NaN"` and `"inf"` parse successfully as f64, so
/// the finite check is load-bearing here.
#[must_use]
pub fn validate_portion_size(raw: &str) -> ValidationReport {
    let mut report = ValidationReport::default();
    let portion = number(raw);
    if !portion.is_finite() {
        report.fail("Portion size must be a number");
    } else if portion <= 0.0 {
        report.fail("Portion size must be greater than 0");
    } else if portion > 10000.0 {
        report.fail("Portion size must be 10000 or less");
    }
    report
}

/// Validate daily goals, including the 15% macro/calorie consistency
/// check.
#[must_use]
pub fn validate_goals(goals: &Goals) -> ValidationReport {
    let mut report = ValidationReport::default();

    if !(800..=10000).contains(&goals.calories) {
        report.fail("Calorie goal must be between 800 and 10000");
    }
    if !(10..=500).contains(&goals.protein) {
        report.fail("Protein goal must be between 10 and 500");
    }
    if !(0..=1000).contains(&goals.carbs) {
        report.fail("Carb goal must be between 0 and 1000");
    }
    if !(10..=300).contains(&goals.fat) {
        report.fail("Fat goal must be between 10 and 300");
    }

    if report.is_valid() {
        let calories = goals.calories as f64;
        let computed = (goals.protein * 4 + goals.carbs * 4 + goals.fat * 9) as f64;
        if (calories - computed).abs() > 0.15 * calories {
            report.fail(format!(
                "Calorie goal doesn't match the macro goals (expected around {computed:.0} kcal)"
            ));
        }
    }

    report
}

/// Validate calorie-calculator input. Height and weight bounds depend on
/// the selected unit system; an unrecognized system reports its own error
/// and skips the dependent checks.
#[must_use]
pub fn validate_calculator(data: &CalculatorData) -> ValidationReport {
    let mut report = ValidationReport::default();

    if !(15.0..=80.0).contains(&data.age) {
        report.fail("Age must be between 15 and 80");
    }
    match data.gender.as_str() {
        "male" | "female" => {}
        _ => report.fail("Select a gender"),
    }

    match data.unit_system.as_str() {
        "imperial" => {
            if !(3.0..=8.0).contains(&data.height_feet)
                || !(0.0..=11.0).contains(&data.height_inches)
            {
                report.fail("Height must be between 3'0\" and 8'11\"");
            }
            if !(50.0..=1000.0).contains(&data.weight_lbs) {
                report.fail("Weight must be between 50 and 1000 lbs");
            }
        }
        "metric" => {
            if !(100.0..=250.0).contains(&data.height_cm) {
                report.fail("Height must be between 100 and 250 cm");
            }
            if !(20.0..=450.0).contains(&data.weight_kg) {
                report.fail("Weight must be between 20 and 450 kg");
            }
        }
        _ => report.fail("Select a unit system"),
    }

    report
}

/// Validate signup/login credentials. Bounds mirror the server-side
/// authority: username trimmed length >= 3, `[A-Za-z0-9_]` only; password
/// at least 6 characters.
#[must_use]
pub fn validate_credentials(username: &str, password: &str) -> ValidationReport {
    let mut report = ValidationReport::default();

    let username = username.trim();
    if username.chars().count() < 3 {
        report.fail("Username must be at least 3 characters");
    }
    if username.is_empty() || !username.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        report.fail("Username may only contain letters, numbers, and underscores");
    }
    if password.chars().count() < 6 {
        report.fail("Password must be at least 6 characters");
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(name: &str, calories: &str, protein: &str, carbs: &str, fat: &str) -> FoodDraft {
        FoodDraft {
            name: name.to_string(),
            calories: calories.to_string(),
            protein: protein.to_string(),
            carbs: carbs.to_string(),
            fat: fat.to_string(),
        }
    }

    // --- sanitize_string ---

    #[test]
    fn test_sanitize_trims_and_escapes() {
        assert_eq!(
            sanitize_string("  <b>\"chicken\" & 'rice'</b>  "),
            "&lt;b&gt;&quot;chicken&quot; &amp; &#39;rice&#39;&lt;/b&gt;"
        );
    }

    #[test]
    fn test_sanitize_plain_text_unchanged() {
        assert_eq!(sanitize_string("chicken breast"), "chicken breast");
    }

    #[test]
    fn test_sanitize_not_idempotent_on_entities() {
        // Known behavior: a second pass re-escapes the entity ampersand.
        let once = sanitize_string("a & b");
        assert_eq!(once, "a &amp; b");
        assert_eq!(sanitize_string(&once), "a &amp;amp; b");
    }

    #[test]
    fn test_sanitize_idempotent_without_specials() {
        let once = sanitize_string("  plain text 123  ");
        assert_eq!(sanitize_string(&once), once);
    }

    // --- validate_food ---

    #[test]
    fn test_food_accumulates_all_errors() {
        let report = validate_food(&draft("", "-5", "200", "0", "0"));
        assert!(!report.is_valid());
        // Name, negative calories, protein over 100 — at least three
        // distinct messages, not just the first failure.
        assert!(report.errors.len() >= 3);
        assert!(report.errors.iter().any(|e| e.contains("name")));
        assert!(report.errors.iter().any(|e| e.contains("Calories")));
        assert!(report.errors.iter().any(|e| e.contains("Protein")));
    }

    #[test]
    fn test_food_valid() {
        let report = validate_food(&draft("Chicken Breast", "165", "31", "0", "3.6"));
        assert!(report.is_valid(), "errors: {:?}", report.errors);
    }

    #[test]
    fn test_food_cross_check_within_tolerance() {
        // 25g protein -> 100 kcal computed, matches exactly.
        let report = validate_food(&draft("Whey", "100", "25", "0", "0"));
        assert!(report.is_valid(), "errors: {:?}", report.errors);
    }

    #[test]
    fn test_food_cross_check_exceeds_tolerance() {
        // 20g fat -> 180 kcal computed vs 100 declared, 80% off.
        let report = validate_food(&draft("Mystery Oil", "100", "0", "0", "20"));
        assert!(!report.is_valid());
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("match the macros"));
    }

    #[test]
    fn test_food_cross_check_skipped_at_low_calories() {
        // 45 kcal declared, macros say 9 kcal — under the 50 kcal
        // threshold the cross-check stays silent.
        let report = validate_food(&draft("Celery", "45", "0", "2", "0.1"));
        assert!(report.is_valid(), "errors: {:?}", report.errors);
    }

    #[test]
    fn test_food_name_boundaries() {
        assert!(validate_food(&draft("ab", "100", "5", "10", "2")).is_valid());
        assert!(!validate_food(&draft("a", "100", "5", "10", "2")).is_valid());
        let long = "x".repeat(101);
        assert!(!validate_food(&draft(&long, "100", "5", "10", "2")).is_valid());
    }

    #[test]
    fn test_food_unparsable_numbers_rejected() {
        let report = validate_food(&draft("Oats", "abc", "", "30", "3"));
        assert!(report.errors.iter().any(|e| e.contains("Calories")));
        assert!(report.errors.iter().any(|e| e.contains("Protein")));
    }

    // --- validate_portion_size ---

    #[test]
    fn test_portion_boundaries() {
        assert!(validate_portion_size("10000").is_valid());
        assert!(!validate_portion_size("10001").is_valid());
        assert!(!validate_portion_size("0").is_valid());
        assert!(!validate_portion_size("-1").is_valid());
        assert!(validate_portion_size("0.5").is_valid());
    }

    #[test]
    fn test_portion_non_numeric() {
        assert!(!validate_portion_size("").is_valid());
        assert!(!validate_portion_size("a lot").is_valid());
    }

    #[test]
    fn test_portion_nonfinite_literals_rejected() {
        // "NaN" and "inf" parse as f64; the finite check must catch them.
        assert!(!validate_portion_size("NaN").is_valid());
        assert!(!validate_portion_size("inf").is_valid());
    }

    // --- validate_goals ---

    #[test]
    fn test_goals_default_valid() {
        // 165*4 + 275*4 + 73*9 = 2417, within 15% of 2200.
        assert!(validate_goals(&Goals::default()).is_valid());
    }

    #[test]
    fn test_goals_out_of_range() {
        let goals = Goals {
            calories: 500,
            protein: 5,
            carbs: 2000,
            fat: 400,
        };
        let report = validate_goals(&goals);
        assert_eq!(report.errors.len(), 4);
    }

    #[test]
    fn test_goals_cross_check() {
        // All in range, but 10+0+10 macros can't explain 5000 kcal.
        let goals = Goals {
            calories: 5000,
            protein: 10,
            carbs: 0,
            fat: 10,
        };
        let report = validate_goals(&goals);
        assert!(!report.is_valid());
        assert!(report.errors[0].contains("macro goals"));
    }

    // --- validate_calculator ---

    fn metric_calc() -> CalculatorData {
        CalculatorData {
            age: 30.0,
            gender: "female".to_string(),
            unit_system: "metric".to_string(),
            height_feet: f64::NAN,
            height_inches: f64::NAN,
            weight_lbs: f64::NAN,
            height_cm: 170.0,
            weight_kg: 65.0,
        }
    }

    #[test]
    fn test_calculator_metric_valid() {
        assert!(validate_calculator(&metric_calc()).is_valid());
    }

    #[test]
    fn test_calculator_age_bounds() {
        let mut data = metric_calc();
        data.age = 14.0;
        assert!(!validate_calculator(&data).is_valid());
        data.age = 80.0;
        assert!(validate_calculator(&data).is_valid());
        data.age = f64::NAN;
        assert!(!validate_calculator(&data).is_valid());
    }

    #[test]
    fn test_calculator_imperial_bounds() {
        let data = CalculatorData {
            age: 40.0,
            gender: "male".to_string(),
            unit_system: "imperial".to_string(),
            height_feet: 5.0,
            height_inches: 11.0,
            weight_lbs: 180.0,
            height_cm: f64::NAN,
            weight_kg: f64::NAN,
        };
        assert!(validate_calculator(&data).is_valid());

        let mut short = data.clone();
        short.height_feet = 2.0;
        assert!(!validate_calculator(&short).is_valid());

        let mut heavy = data;
        heavy.weight_lbs = 1001.0;
        assert!(!validate_calculator(&heavy).is_valid());
    }

    #[test]
    fn test_calculator_unknown_system_and_gender() {
        let mut data = metric_calc();
        data.gender = "other".to_string();
        data.unit_system = String::new();
        let report = validate_calculator(&data);
        assert_eq!(report.errors.len(), 2);
    }

    // --- validate_credentials ---

    #[test]
    fn test_credentials_valid() {
        assert!(validate_credentials("alice_99", "hunter22").is_valid());
    }

    #[test]
    fn test_credentials_short_username() {
        let report = validate_credentials("ab", "longenough");
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("3 characters"));
    }

    #[test]
    fn test_credentials_bad_characters() {
        assert!(!validate_credentials("al ice", "longenough").is_valid());
        assert!(!validate_credentials("alice!", "longenough").is_valid());
    }

    #[test]
    fn test_credentials_short_password() {
        let report = validate_credentials("alice", "12345");
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("Password"));
    }

    #[test]
    fn test_credentials_all_errors_reported() {
        let report = validate_credentials("a!", "123");
        assert_eq!(report.errors.len(), 3);
    }
}
