use crate::model::{LedgerAnalysis, LedgerEntry, LedgerSummary, PaymentType};

/// Totals for one ledger page. Credit-card incomes form their own bucket;
/// every other income, including untagged ones, counts as cash.
pub fn summarize(incomes: &[LedgerEntry], expenses: &[LedgerEntry]) -> LedgerSummary {
    let finite = |e: &LedgerEntry| if e.amount.is_finite() { e.amount } else { 0.0 };

    let (credit_card, cash) = incomes.iter().fold((0.0, 0.0), |(card, cash), e| {
        match e.payment_type {
            Some(PaymentType::CreditCard) => (card + finite(e), cash),
            _ => (card, cash + finite(e)),
        }
    });
    let total_income = credit_card + cash;
    let total_expense: f64 = expenses.iter().map(finite).sum();

    LedgerSummary {
        credit_card,
        cash,
        total_income,
        total_expense,
        net: total_income - total_expense,
    }
}

impl LedgerAnalysis {
    pub fn new(date: Option<String>, incomes: Vec<LedgerEntry>, expenses: Vec<LedgerEntry>) -> Self {
        let summary = summarize(&incomes, &expenses);
        Self {
            date,
            incomes,
            expenses,
            summary,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(amount: f64, payment_type: Option<PaymentType>) -> LedgerEntry {
        LedgerEntry {
            description: String::new(),
            amount,
            payment_type,
        }
    }

    #[test]
    fn splits_card_and_cash() {
        let s = summarize(
            &[
                entry(500.0, Some(PaymentType::CreditCard)),
                entry(300.0, Some(PaymentType::OpenAccount)),
            ],
            &[entry(100.0, None)],
        );
        assert_eq!(s.credit_card, 500.0);
        assert_eq!(s.cash, 300.0);
        assert_eq!(s.total_income, 800.0);
        assert_eq!(s.total_expense, 100.0);
        assert_eq!(s.net, 700.0);
    }

    #[test]
    fn untagged_income_is_cash() {
        let s = summarize(&[entry(250.0, None), entry(50.0, Some(PaymentType::Cash))], &[]);
        assert_eq!(s.credit_card, 0.0);
        assert_eq!(s.cash, 300.0);
        assert_eq!(s.net, 300.0);
    }

    #[test]
    fn empty_and_non_finite_inputs_are_total() {
        assert_eq!(summarize(&[], &[]), LedgerSummary::default());
        let s = summarize(&[entry(f64::NAN, None)], &[entry(f64::INFINITY, None)]);
        assert_eq!(s, LedgerSummary::default());
    }
}
