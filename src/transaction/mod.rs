/// Transaction assembler: building, packing and submitting transactions
pub mod builder;
/// Address lookup table fetching
pub mod lookup;
/// Greedy packing of instruction groups
pub mod packer;
/// Simulation and balance diffing
pub mod simulation;
/// Token account byte layout
pub mod token_layout;

pub use builder::{
	MEMO_PROGRAM_ID, PackedTransaction, TransactionAssembler, TransactionError,
	compile_transaction, compute_budget_instructions, memo_instruction,
};
pub use lookup::decode_lookup_table;
pub use packer::{Batch, pack_groups};
pub use simulation::{
	BalanceDelta, BalanceStage, SimulationErrorCode, SimulationFailure, SimulationOutcome,
	SkippedAccount, TokenAmount, TokenBalance, token_changes_from_executed, writable_accounts,
};
pub use token_layout::{Skipped, TokenAccountBalance, decode_token_account};
