use crate::error::{ExpenseError, Result};
use iso_currency::Currency;
use num_format::{CustomFormat, Grouping, ToFormattedString as _};

/// Decimal places used when the code is not a known ISO 4217 currency.
const FALLBACK_DECIMAL_PLACES: usize = 2;

/// Renders amounts for one display currency.
///
/// Yen is shown without decimals, Rupees use Indian digit grouping
/// (`₹12,34,567.50`), every other ISO currency uses its own symbol and
/// exponent with western grouping. Unrecognized codes fall back to the code
/// itself followed by a grouped number.
#[derive(Debug, Clone)]
pub struct CurrencyFormatter {
    code: String,
    currency: Option<Currency>,
}

impl CurrencyFormatter {
    pub fn new(code: &str) -> Self {
        let code = code.trim().to_uppercase();
        let currency = Currency::from_code(&code);
        Self { code, currency }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn is_recognized(&self) -> bool {
        self.currency.is_some()
    }

    fn decimal_places(&self) -> usize {
        match self.currency {
            Some(currency) => currency.exponent().unwrap_or(0) as usize,
            None => FALLBACK_DECIMAL_PLACES,
        }
    }

    fn symbol(&self) -> String {
        match self.currency {
            Some(Currency::JPY) => "¥".to_string(),
            Some(Currency::INR) => "₹".to_string(),
            Some(currency) => currency.symbol().to_string(),
            None => format!("{} ", self.code),
        }
    }

    fn grouping_format(&self) -> Result<CustomFormat> {
        let grouping = match self.currency {
            Some(Currency::INR) => Grouping::Indian,
            _ => Grouping::Standard,
        };
        CustomFormat::builder()
            .grouping(grouping)
            .separator(",")
            .decimal(".")
            .minus_sign("-")
            .build()
            .map_err(|e| ExpenseError::CurrencyFormat(e.to_string()))
    }

    pub fn format(&self, amount: f64) -> Result<String> {
        if !amount.is_finite() {
            return Err(ExpenseError::CurrencyFormat(format!(
                "cannot format non-finite amount {}",
                amount
            )));
        }

        let decimal_places = self.decimal_places();
        let scale = 10_i64.pow(decimal_places as u32);
        let scaled = (amount.abs() * scale as f64).round();
        if scaled >= i64::MAX as f64 {
            return Err(ExpenseError::CurrencyFormat(format!(
                "amount {} is out of range",
                amount
            )));
        }
        let scaled = scaled as i64;

        let integer_part = (scaled / scale).to_formatted_string(&self.grouping_format()?);
        let sign = if amount < 0.0 && scaled != 0 { "-" } else { "" };

        if decimal_places == 0 {
            Ok(format!("{}{}{}", sign, self.symbol(), integer_part))
        } else {
            Ok(format!(
                "{}{}{}.{:0width$}",
                sign,
                self.symbol(),
                integer_part,
                scaled % scale,
                width = decimal_places
            ))
        }
    }
}

pub fn format_currency(amount: f64, code: &str) -> Result<String> {
    CurrencyFormatter::new(code).format(amount)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yen_has_no_decimals() {
        assert_eq!(format_currency(1500.0, "JPY").unwrap(), "¥1,500");
        assert_eq!(format_currency(1234567.6, "jpy").unwrap(), "¥1,234,568");
    }

    #[test]
    fn test_rupee_uses_indian_grouping() {
        assert_eq!(format_currency(1234567.5, "INR").unwrap(), "₹12,34,567.50");
        assert_eq!(format_currency(999.0, "INR").unwrap(), "₹999.00");
    }

    #[test]
    fn test_other_and_unknown_codes() {
        let usd = format_currency(1234.5, "USD").unwrap();
        assert!(usd.ends_with("1,234.50"));

        assert_eq!(format_currency(1234.5, "XQQ").unwrap(), "XQQ 1,234.50");
        assert!(!CurrencyFormatter::new("XQQ").is_recognized());
    }

    #[test]
    fn test_negative_and_non_finite() {
        assert_eq!(format_currency(-1500.0, "JPY").unwrap(), "-¥1,500");
        assert!(format_currency(f64::NAN, "JPY").is_err());
    }
}
