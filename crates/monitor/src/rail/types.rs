use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct PayoutBatchRequest<'a> {
    pub sender_batch_header: SenderBatchHeader<'a>,
    pub items: Vec<PayoutItem<'a>>,
}

#[derive(Debug, Serialize)]
pub struct SenderBatchHeader<'a> {
    pub sender_batch_id: &'a str,
    pub email_subject: &'a str,
    pub email_message: &'a str,
}

#[derive(Debug, Serialize)]
pub struct PayoutItem<'a> {
    pub recipient_type: &'static str,
    pub amount: Money<'a>,
    pub receiver: &'a str,
    pub note: &'a str,
    pub sender_item_id: &'a str,
}

#[derive(Debug, Serialize)]
pub struct Money<'a> {
    pub value: String,
    pub currency: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct PayoutBatchResponse {
    pub batch_header: BatchHeader,
}

#[derive(Debug, Deserialize)]
pub struct BatchHeader {
    pub payout_batch_id: String,
    #[serde(default)]
    pub batch_status: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct RailErrorBody {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}
