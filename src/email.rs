use anyhow::Context;
use lettre::{
    message::Mailbox, transport::smtp::authentication::Credentials, Address, AsyncSmtpTransport,
    AsyncTransport, Message, Tokio1Executor,
};
use std::env::var;

lazy_static::lazy_static! {
    static ref EMAIL_USERNAME: String = var("EMAIL_USERNAME").expect("email username must be set for notification emails");
    static ref EMAIL_PASSWORD: String = var("EMAIL_PASSWORD").expect("email access password must be set for notification emails");
    static ref CREDS: Credentials = Credentials::new(EMAIL_USERNAME.to_string(), EMAIL_PASSWORD.to_string());
    pub static ref EMAIL_ADDRESS: Address = EMAIL_USERNAME.parse::<Address>().expect("invalid email username");
    pub static ref FRONTEND_HOST: String = var("FRONTEND_HOST").expect("FRONTEND_HOST must be set for correct links in emails");
}

const SENDER_NAME: &str = "The ShikshaHub Team";

pub async fn sanity_check() -> anyhow::Result<()> {
    let mbox = Mailbox::new(None, EMAIL_ADDRESS.clone());
    let email = Message::builder()
        .from(mbox.clone())
        .to(mbox)
        .subject("Ensuring provided email is valid")
        .body("SANITY CHECK".to_string())
        .context("failed to build sanity check message")?;

    send(email).await.context("email sanity check failed")?;
    Ok(())
}

pub async fn send(msg: Message) -> anyhow::Result<()> {
    let mailer: AsyncSmtpTransport<Tokio1Executor> =
        AsyncSmtpTransport::<Tokio1Executor>::relay("smtp.gmail.com")
            .context("invalid smtp relay")?
            .credentials(CREDS.clone())
            .build();

    mailer.send(msg).await?;
    Ok(())
}

pub fn welcome_message(name: &str, email: &str) -> anyhow::Result<Message> {
    let body = format!(
        r#"Hi {name},

Welcome to ShikshaHub! Your account is ready.

Join a community with an invite code from your teacher, or browse the
community list and request to join. Once you are in, you can share
materials, write blog posts, and keep up with community events.

{}

Thanks,
{SENDER_NAME}."#,
        *FRONTEND_HOST,
    );

    let destination = email.parse::<Address>().context("invalid email address")?;
    Ok(Message::builder()
        .from(Mailbox::new(
            Some(SENDER_NAME.to_string()),
            EMAIL_ADDRESS.clone(),
        ))
        .to(Mailbox::new(Some(name.to_string()), destination))
        .subject("Welcome to ShikshaHub!")
        .body(body)?)
}

pub fn password_reset_message(
    name: &str,
    email: &str,
    uid: &str,
    minutes: u64,
) -> anyhow::Result<Message> {
    let link = format!("{}/reset-password/{uid}", *FRONTEND_HOST);
    let body = format!(
        r#"Hi {name},

We have received a request to change your ShikshaHub password. To reset
your password, please open the below link within the next {minutes} minutes:

{link}

If you did not request this password reset you can disregard this message
and your password will remain unchanged.

Thanks,
{SENDER_NAME}."#,
    );

    let destination = email.parse::<Address>().context("invalid email address")?;
    Ok(Message::builder()
        .from(Mailbox::new(
            Some(SENDER_NAME.to_string()),
            EMAIL_ADDRESS.clone(),
        ))
        .to(Mailbox::new(Some(name.to_string()), destination))
        .subject("ShikshaHub Password Reset")
        .body(body)?)
}
