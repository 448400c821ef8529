pub mod assemble;
pub mod docx;
pub mod extract;
pub mod llm;
pub mod markup;
pub mod prompts;
pub mod session;
