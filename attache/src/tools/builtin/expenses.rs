//! Expense tracking tools.

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use super::parse_args;
use crate::error::ToolErrorKind;
use crate::store::Expense;
use crate::tools::{Tool, ToolContext, ToolOutcome, ToolSpec};

pub struct AddExpense;

#[derive(Deserialize)]
struct AddExpenseArgs {
    amount: f64,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    note: Option<String>,
    /// `YYYY-MM-DD`; defaults to today.
    #[serde(default)]
    date: Option<String>,
}

#[async_trait]
impl Tool for AddExpense {
    fn name(&self) -> &str {
        "add_expense"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "add_expense".into(),
            description: "Record an expense (amount, optional category/note/date).".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "amount": {"type": "number"},
                    "category": {"type": "string"},
                    "note": {"type": "string"},
                    "date": {"type": "string", "description": "YYYY-MM-DD"}
                },
                "required": ["amount"]
            }),
            rarely_used: false,
        }
    }

    async fn call(&self, params: Value, ctx: &ToolContext) -> ToolOutcome {
        let args = parse_args!(AddExpenseArgs, params);
        if !args.amount.is_finite() || args.amount <= 0.0 {
            return ToolOutcome::fail(ToolErrorKind::InvalidArgs, "amount must be positive");
        }
        let date = match args.date.as_deref() {
            Some(s) => match NaiveDate::parse_from_str(s, "%Y-%m-%d") {
                Ok(d) => d,
                Err(_) => {
                    return ToolOutcome::fail(
                        ToolErrorKind::InvalidArgs,
                        format!("bad date `{s}` (expected YYYY-MM-DD)"),
                    )
                }
            },
            None => Utc::now().date_naive(),
        };
        let mut expense = Expense::new(
            args.amount,
            args.category.unwrap_or_else(|| "general".into()),
            args.note.unwrap_or_default(),
            date,
        );
        match ctx.scope.put(&mut expense) {
            Ok(()) => ToolOutcome::ok(format!(
                "Expense recorded: {:.2} ({}) on {}",
                expense.amount, expense.category, expense.date
            )),
            Err(e) => ToolOutcome::fail(ToolErrorKind::Failed, e.to_string()),
        }
    }
}

pub struct GetExpenses;

#[derive(Deserialize)]
struct GetExpensesArgs {
    /// `YYYY-MM`; defaults to the current month.
    #[serde(default)]
    month: Option<String>,
}

#[async_trait]
impl Tool for GetExpenses {
    fn name(&self) -> &str {
        "get_expenses"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "get_expenses".into(),
            description: "Show expenses and totals for a month (default: current).".into(),
            input_schema: json!({
                "type": "object",
                "properties": {"month": {"type": "string", "description": "YYYY-MM"}}
            }),
            rarely_used: false,
        }
    }

    fn parallel_safe(&self) -> bool {
        true
    }

    async fn call(&self, params: Value, ctx: &ToolContext) -> ToolOutcome {
        let args = parse_args!(GetExpensesArgs, params);
        let (year, month) = match args.month.as_deref() {
            Some(s) => {
                let mut parts = s.splitn(2, '-');
                match (
                    parts.next().and_then(|y| y.parse::<i32>().ok()),
                    parts.next().and_then(|m| m.parse::<u32>().ok()),
                ) {
                    (Some(y), Some(m)) if (1..=12).contains(&m) => (y, m),
                    _ => {
                        return ToolOutcome::fail(
                            ToolErrorKind::InvalidArgs,
                            format!("bad month `{s}` (expected YYYY-MM)"),
                        )
                    }
                }
            }
            None => {
                let today = Utc::now().date_naive();
                (today.year(), today.month())
            }
        };

        let expenses = match ctx.scope.list::<Expense>() {
            Ok(e) => e,
            Err(e) => return ToolOutcome::fail(ToolErrorKind::Failed, e.to_string()),
        };
        let in_month: Vec<&Expense> = expenses
            .iter()
            .filter(|e| e.date.year() == year && e.date.month() == month)
            .collect();
        if in_month.is_empty() {
            return ToolOutcome::ok(format!("No expenses in {year}-{month:02}."));
        }

        let total: f64 = in_month.iter().map(|e| e.amount).sum();
        let mut by_category: std::collections::BTreeMap<&str, f64> = Default::default();
        for e in &in_month {
            *by_category.entry(e.category.as_str()).or_default() += e.amount;
        }
        let breakdown = by_category
            .iter()
            .map(|(c, v)| format!("  {c}: {v:.2}"))
            .collect::<Vec<_>>()
            .join("\n");
        ToolOutcome::ok(format!(
            "{} expense(s) in {year}-{month:02}, total {total:.2}\n{breakdown}",
            in_month.len()
        ))
    }
}
