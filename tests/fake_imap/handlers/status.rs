//! STATUS command handler.
//!
//! Responds with the requested counters without selecting the folder
//! (RFC 3501 Section 6.3.10):
//!
//! ```text
//! * STATUS "INBOX" (MESSAGES 3 UNSEEN 1)
//! A0004 OK STATUS completed
//! ```

use crate::fake_imap::io::write_line;
use crate::fake_imap::mailbox::Mailbox;
use imap_codec::imap_types::status::StatusDataItemName;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

/// Handle the STATUS command.
pub async fn handle_status<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    folder_name: &str,
    items: &[StatusDataItemName],
    mailbox: &Mailbox,
    stream: &mut BufReader<S>,
) {
    let Some(folder) = mailbox.get_folder(folder_name) else {
        let resp = format!("{tag} NO Folder not found\r\n");
        let _ = write_line(stream, &resp).await;
        return;
    };

    let mut pairs = Vec::new();
    for item in items {
        match item {
            StatusDataItemName::Messages => {
                pairs.push(format!("MESSAGES {}", folder.emails.len()));
            }
            StatusDataItemName::Recent => pairs.push("RECENT 0".to_string()),
            StatusDataItemName::UidNext => {
                pairs.push(format!("UIDNEXT {}", folder.next_uid()));
            }
            StatusDataItemName::UidValidity => pairs.push("UIDVALIDITY 1".to_string()),
            StatusDataItemName::Unseen => {
                let unseen = folder.emails.iter().filter(|e| !e.seen()).count();
                pairs.push(format!("UNSEEN {unseen}"));
            }
            _ => {}
        }
    }

    let line = format!("* STATUS \"{folder_name}\" ({})\r\n", pairs.join(" "));
    let _ = write_line(stream, &line).await;
    let resp = format!("{tag} OK STATUS completed\r\n");
    let _ = write_line(stream, &resp).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_imap::mailbox::MailboxBuilder;
    use tokio::io::BufReader;

    fn make_raw_email() -> Vec<u8> {
        b"From: a@b.com\r\nSubject: Test\r\n\r\nBody".to_vec()
    }

    async fn run(
        tag: &str,
        folder: &str,
        items: &[StatusDataItemName],
        mailbox: &Mailbox,
    ) -> String {
        let (client, server) = tokio::io::duplex(4096);
        let mut stream = BufReader::new(server);

        handle_status(tag, folder, items, mailbox, &mut stream).await;
        drop(stream);

        let mut buf = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut BufReader::new(client), &mut buf)
            .await
            .unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[tokio::test]
    async fn reports_message_and_unseen_counts() {
        let raw = make_raw_email();
        let mailbox = MailboxBuilder::new()
            .folder("INBOX")
            .email(1, true, &raw)
            .email(2, false, &raw)
            .email(3, false, &raw)
            .build();

        let output = run(
            "A1",
            "INBOX",
            &[StatusDataItemName::Messages, StatusDataItemName::Unseen],
            &mailbox,
        )
        .await;

        assert!(output.contains("* STATUS \"INBOX\" (MESSAGES 3 UNSEEN 2)"));
        assert!(output.contains("A1 OK STATUS completed"));
    }

    #[tokio::test]
    async fn missing_folder_returns_no() {
        let mailbox = MailboxBuilder::new().folder("INBOX").build();
        let output = run("A1", "Gone", &[StatusDataItemName::Messages], &mailbox).await;
        assert!(output.contains("A1 NO Folder not found"));
    }
}
