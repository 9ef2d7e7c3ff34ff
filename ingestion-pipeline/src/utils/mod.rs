pub mod archive;
pub mod file_text_extraction;
pub mod llm_instructions;
pub mod normalize;
pub mod pdf_ingestion;
pub mod word_extraction;
