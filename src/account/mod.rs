mod accounts_page;
mod core;

pub use accounts_page::get_accounts_page;
pub use core::{
    Account, AccountKind, AccountWithBalance, create_account, create_account_table,
    get_accounts_with_balances,
};
