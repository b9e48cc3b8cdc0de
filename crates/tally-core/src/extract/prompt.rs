//! Extraction prompt

const EXTRACTION_INSTRUCTIONS: &str = r#"You are reading a bank statement that was converted to markdown.
Return ONLY a JSON object with this shape:

{
  "transactions": [
    {"date": "YYYY-MM-DD", "description": "...", "amount": -12.34, "type": "debit", "reference": null}
  ],
  "balances": {"opening": 100.00, "closing": 87.66, "source": "closing_balance_line"},
  "accountNumber": "last four digits or null",
  "bankName": "name or null",
  "statementPeriod": {"start": "YYYY-MM-DD", "end": "YYYY-MM-DD"}
}

Rules:
- Copy every transaction row exactly once, in statement order.
- Keep the amount sign as printed. Use the bank's own label for "type".
- "source" is "closing_balance_line" when the statement prints a closing balance,
  "computed" when you added it up yourself, otherwise "unknown".
- Use null for anything the statement does not show. Do not guess."#;

/// Build the extraction prompt for a statement's OCR text
pub fn build_prompt(markdown: &str) -> String {
    format!(
        "{}\n\nStatement:\n---\n{}\n---",
        EXTRACTION_INSTRUCTIONS, markdown
    )
}
