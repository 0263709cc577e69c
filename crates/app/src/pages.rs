use std::fmt::Write as _;

use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
    Form,
};
use tracing::error;

use contoso_expenses_core::email::escape_html;
use contoso_expenses_core::{Expense, ExpenseForm, ValidationErrors};

use crate::router::AppState;
use crate::submission::SubmissionError;

const LIST_LIMIT: u32 = 100;

pub async fn index() -> Redirect {
    Redirect::to("/expenses")
}

/// `GET /expenses`
pub async fn list_expenses(State(state): State<AppState>) -> Response {
    match state.storage().expenses().list_recent(LIST_LIMIT).await {
        Ok(expenses) => Html(render_list(&expenses)).into_response(),
        Err(err) => {
            error!(stage = "web", error = %err, "failed to list expenses");
            error_page("The expense list could not be loaded.")
        }
    }
}

/// `GET /expenses/create`
pub async fn create_form() -> Html<String> {
    Html(render_form(&ExpenseForm::default(), None))
}

/// `POST /expenses/create`
pub async fn submit_expense(
    State(state): State<AppState>,
    Form(form): Form<ExpenseForm>,
) -> Response {
    match state.workflow().submit(&form).await {
        Ok(_) => Redirect::to("/expenses").into_response(),
        Err(SubmissionError::Validation(errors)) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Html(render_form(&form, Some(&errors))),
        )
            .into_response(),
        Err(SubmissionError::Storage(_)) => {
            error_page("Your expense could not be saved. Please try again.")
        }
    }
}

fn error_page(message: &str) -> Response {
    let body = format!(
        "<h1>Something went wrong</h1>\n<p>{}</p>\n<p><a href=\"/expenses\">Back to expenses</a></p>",
        escape_html(message)
    );
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Html(layout("Error", &body)),
    )
        .into_response()
}

fn layout(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n<title>{} - Contoso Expenses</title>\n</head>\n<body>\n{}\n</body>\n</html>\n",
        escape_html(title),
        body
    )
}

fn render_list(expenses: &[Expense]) -> String {
    let mut body = String::from(
        "<h1>Expenses</h1>\n<p><a href=\"/expenses/create\">Create new</a></p>\n",
    );
    if expenses.is_empty() {
        body.push_str("<p>No expenses have been submitted yet.</p>");
        return layout("Expenses", &body);
    }

    body.push_str(
        "<table>\n<thead><tr><th>Submitted</th><th>Submitter</th><th>Approver</th><th>Cost center</th><th>Purpose</th><th>Amount</th></tr></thead>\n<tbody>\n",
    );
    for expense in expenses {
        let _ = writeln!(
            body,
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            expense.submitted_at.format("%Y-%m-%d %H:%M UTC"),
            escape_html(&expense.submitter_email),
            escape_html(&expense.approver_email),
            escape_html(&expense.cost_center),
            escape_html(&expense.purpose),
            expense.amount,
        );
    }
    body.push_str("</tbody>\n</table>");
    layout("Expenses", &body)
}

fn render_form(form: &ExpenseForm, errors: Option<&ValidationErrors>) -> String {
    let field_error = |field: &str| -> String {
        errors
            .map(|errors| {
                errors
                    .for_field(field)
                    .map(|message| {
                        format!("<span class=\"field-error\">{}</span>", escape_html(message))
                    })
                    .collect::<String>()
            })
            .unwrap_or_default()
    };

    let mut body = String::from("<h1>Create expense</h1>\n");
    if let Some(errors) = errors {
        body.push_str("<ul class=\"validation-summary\">\n");
        for error in errors.iter() {
            let _ = writeln!(body, "<li>{}</li>", escape_html(&error.message));
        }
        body.push_str("</ul>\n");
    }

    let _ = write!(
        body,
        concat!(
            "<form method=\"post\" action=\"/expenses/create\">\n",
            "<label for=\"submitterEmail\">Submitter email</label>\n",
            "<input id=\"submitterEmail\" name=\"submitterEmail\" type=\"email\" value=\"{email}\">{email_error}\n",
            "<label for=\"purpose\">Purpose</label>\n",
            "<input id=\"purpose\" name=\"purpose\" value=\"{purpose}\">{purpose_error}\n",
            "<label for=\"amount\">Amount</label>\n",
            "<input id=\"amount\" name=\"amount\" inputmode=\"decimal\" value=\"{amount}\">{amount_error}\n",
            "<button type=\"submit\">Create</button>\n",
            "</form>\n",
            "<p><a href=\"/expenses\">Back to list</a></p>"
        ),
        email = escape_html(&form.submitter_email),
        email_error = field_error("submitterEmail"),
        purpose = escape_html(&form.purpose),
        purpose_error = field_error("purpose"),
        amount = escape_html(&form.amount),
        amount_error = field_error("amount"),
    );
    layout("Create expense", &body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn form_echoes_input_and_errors() {
        let form = ExpenseForm {
            submitter_email: "<a@x.com>".into(),
            purpose: String::new(),
            amount: "abc".into(),
        };
        let errors = form.validate().expect_err("invalid");
        let html = render_form(&form, Some(&errors));

        assert!(html.contains("value=\"&lt;a@x.com&gt;\""));
        assert!(html.contains("validation-summary"));
        assert!(html.contains("field-error"));
    }

    #[test]
    fn empty_list_renders_placeholder() {
        let html = render_list(&[]);
        assert!(html.contains("No expenses have been submitted yet."));
        assert!(html.contains("/expenses/create"));
    }
}
