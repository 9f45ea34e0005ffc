mod approvals;
mod conversation_manager;
mod exec;
mod interrupt;
mod turn_lifecycle;
