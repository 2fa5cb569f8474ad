//! COPY / UID COPY command handler.
//!
//! Copies messages from the selected folder to a destination folder;
//! the originals remain in the source. Copies receive fresh UIDs in
//! the destination. A missing destination answers `NO [TRYCREATE]`.

use crate::fake_imap::io::write_line;
use crate::fake_imap::mailbox::{Mailbox, resolve_uids};
use imap_codec::imap_types::sequence::SequenceSet;
use std::sync::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

/// Handle the COPY / UID COPY command.
pub async fn handle_copy<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    sequence_set: &SequenceSet,
    uid: bool,
    dest_folder: &str,
    mailbox: &Mutex<Mailbox>,
    selected_folder: Option<&str>,
    stream: &mut BufReader<S>,
) {
    let Some(folder_name) = selected_folder else {
        let resp = format!("{tag} BAD No folder selected\r\n");
        let _ = write_line(stream, &resp).await;
        return;
    };

    // Perform the copy under lock (no await inside).
    let outcome = {
        let mut mb = mailbox.lock().unwrap();
        if mb.get_folder(folder_name).is_none() {
            Err(format!("{tag} BAD Source folder not found\r\n"))
        } else if mb.get_folder(dest_folder).is_none() {
            Err(format!(
                "{tag} NO [TRYCREATE] Destination folder not found\r\n"
            ))
        } else {
            let source = mb.get_folder(folder_name).unwrap();
            let uids = resolve_uids(source, sequence_set, uid);
            let to_copy: Vec<_> = source
                .emails
                .iter()
                .filter(|e| uids.contains(&e.uid))
                .cloned()
                .collect();

            let dest = mb.get_folder_mut(dest_folder).unwrap();
            for mut email in to_copy {
                email.uid = dest.next_uid();
                dest.emails.push(email);
            }
            Ok(format!("{tag} OK COPY completed\r\n"))
        }
    };

    let resp = match outcome {
        Ok(line) | Err(line) => line,
    };
    let _ = write_line(stream, &resp).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_imap::mailbox::MailboxBuilder;
    use imap_codec::imap_types::sequence::{SeqOrUid, Sequence};
    use std::num::NonZeroU32;
    use tokio::io::BufReader;

    fn single_set(id: u32) -> SequenceSet {
        SequenceSet(
            vec![Sequence::Single(SeqOrUid::Value(
                NonZeroU32::new(id).unwrap(),
            ))]
            .try_into()
            .unwrap(),
        )
    }

    fn make_raw_email() -> Vec<u8> {
        b"From: a@b.com\r\nSubject: Test\r\n\r\nBody".to_vec()
    }

    async fn run_copy(
        tag: &str,
        seq: &SequenceSet,
        dest: &str,
        mailbox: &Mutex<Mailbox>,
        selected: Option<&str>,
    ) -> String {
        let (client, server) = tokio::io::duplex(4096);
        let mut stream = BufReader::new(server);

        handle_copy(tag, seq, true, dest, mailbox, selected, &mut stream).await;
        drop(stream);

        let mut buf = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut BufReader::new(client), &mut buf)
            .await
            .unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[tokio::test]
    #[allow(clippy::significant_drop_tightening)]
    async fn copies_email_to_destination() {
        let raw = make_raw_email();
        let mb = Mutex::new(
            MailboxBuilder::new()
                .folder("INBOX")
                .email(1, false, &raw)
                .folder("Archive")
                .build(),
        );

        let output = run_copy("A1", &single_set(1), "Archive", &mb, Some("INBOX")).await;

        assert!(output.contains("A1 OK COPY completed"));

        let locked = mb.lock().unwrap();
        let archive = locked.get_folder("Archive").unwrap();
        assert_eq!(archive.emails.len(), 1);
        // Source remains.
        assert_eq!(locked.get_folder("INBOX").unwrap().emails.len(), 1);
    }

    #[tokio::test]
    async fn missing_dest_returns_trycreate() {
        let raw = make_raw_email();
        let mb = Mutex::new(
            MailboxBuilder::new()
                .folder("INBOX")
                .email(1, false, &raw)
                .build(),
        );

        let output = run_copy("A1", &single_set(1), "NoSuch", &mb, Some("INBOX")).await;

        assert!(output.contains("TRYCREATE"));
    }

    #[tokio::test]
    async fn no_folder_selected_returns_bad() {
        let mb = Mutex::new(MailboxBuilder::new().folder("INBOX").build());

        let output = run_copy("A1", &single_set(1), "Trash", &mb, None).await;

        assert!(output.contains("A1 BAD No folder selected"));
    }
}
