use crate::domain::account::Account;
use crate::error::Result;
use std::io::Write;

/// Writes final wallet balances as `user,balance` CSV rows.
pub struct BalanceWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> BalanceWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_accounts(&mut self, accounts: impl IntoIterator<Item = Account>) -> Result<()> {
        self.writer.write_record(["user", "balance"])?;
        for account in accounts {
            self.writer
                .write_record([account.user.as_str(), &account.balance.0.to_string()])?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
