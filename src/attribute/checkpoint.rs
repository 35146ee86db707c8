use std::cmp::Ordering;

use crate::error::{BatchError, Result};

/// Category rank of a checkpoint value: `n` > `s` > `c=<minutes>` > `c` > `u` > unset.
///
/// Two `c=<minutes>` values share a rank whatever their minutes.
pub fn order_checkpoint(value: Option<&str>) -> u8 {
    let Some(value) = value else {
        return 0;
    };
    let mut chars = value.chars();
    match chars.next() {
        Some('n') => 5,
        Some('s') => 4,
        Some('c') if chars.next().is_some() => 3,
        Some('c') => 2,
        Some('u') => 1,
        _ => 0,
    }
}

pub fn compare(a: Option<&str>, b: Option<&str>) -> Ordering {
    order_checkpoint(a).cmp(&order_checkpoint(b))
}

/// Validate a checkpoint value as accepted at job submission.
pub fn validate(value: &str) -> Result<()> {
    for field in value.split(',').map(str::trim).filter(|f| !f.is_empty()) {
        let ok = match field {
            "n" | "s" | "u" | "c" => true,
            "none" | "periodic" | "shutdown" | "enabled" => true,
            f if f.starts_with("c=") => f[2..].trim().parse::<i64>().map_or(false, |m| m > 0),
            f => f.starts_with("interval=") || f.starts_with("depth=") || f.starts_with("dir="),
        };
        if !ok {
            return Err(BatchError::invalid_value("Checkpoint", value));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_ranks() {
        assert_eq!(order_checkpoint(Some("n")), 5);
        assert_eq!(order_checkpoint(Some("s")), 4);
        assert_eq!(order_checkpoint(Some("c=15")), 3);
        assert_eq!(order_checkpoint(Some("c")), 2);
        assert_eq!(order_checkpoint(Some("u")), 1);
        assert_eq!(order_checkpoint(Some("x")), 0);
        assert_eq!(order_checkpoint(Some("")), 0);
        assert_eq!(order_checkpoint(None), 0);
    }

    #[test]
    fn minutes_do_not_affect_order() {
        assert_eq!(order_checkpoint(Some("c=5")), order_checkpoint(Some("c=10")));
        assert_eq!(compare(Some("c=5"), Some("c=10")), Ordering::Equal);
        assert_eq!(compare(Some("n"), Some("c=10")), Ordering::Greater);
        assert_eq!(compare(None, Some("u")), Ordering::Less);
    }

    #[test]
    fn validation() {
        assert!(validate("c=30").is_ok());
        assert!(validate("s,dir=/scratch").is_ok());
        assert!(validate("periodic,interval=10").is_ok());
        assert!(validate("c=0").is_err());
        assert!(validate("c=abc").is_err());
        assert!(validate("x").is_err());
        assert!(validate("sometimes").is_err());
    }
}
