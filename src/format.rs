// Display helpers shared by the assistant, CLI and TUI

/// "$1,234,567.89", with a leading minus for negatives
pub fn money(amount: f64) -> String {
    let negative = amount < 0.0;
    let cents = (amount.abs() * 100.0).round() as u64;
    let dollars = (cents / 100).to_string();

    let mut grouped = String::with_capacity(dollars.len() + dollars.len() / 3);
    for (i, ch) in dollars.chars().enumerate() {
        if i > 0 && (dollars.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    format!("{}${}.{:02}", if negative { "-" } else { "" }, grouped, cents % 100)
}

/// "3.5%" from 0.035
pub fn percent(rate: f64) -> String {
    let pct = rate * 100.0;
    if (pct - pct.round()).abs() < 1e-9 {
        format!("{:.0}%", pct)
    } else {
        format!("{:.2}%", pct).replace("0%", "%")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_money() {
        assert_eq!(money(0.0), "$0.00");
        assert_eq!(money(999.5), "$999.50");
        assert_eq!(money(1_234_567.891), "$1,234,567.89");
        assert_eq!(money(-45_000.0), "-$45,000.00");
    }

    #[test]
    fn test_percent() {
        assert_eq!(percent(0.05), "5%");
        assert_eq!(percent(0.035), "3.5%");
        assert_eq!(percent(0.0278), "2.78%");
    }
}
