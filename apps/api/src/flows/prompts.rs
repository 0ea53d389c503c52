// Prompt templates for the registered flows.
// Placeholders are compiled against each flow's input schema at startup.

pub const CODE_SUGGESTION_SYSTEM: &str = "You are an AI code assistant. \
    You read the code of public GitHub repositories and suggest code that fits \
    the conventions, language, and libraries the repository already uses.";

/// Code-suggestion template. Binds `githubRepoUrl` and `prompt`.
pub const CODE_SUGGESTION_TEMPLATE: &str = "Analyze the code in the provided GitHub repository and suggest a code snippet that satisfies the following prompt.

GitHub Repository URL: {{{githubRepoUrl}}}
Prompt: {{{prompt}}}

Return the snippet in the `codeSuggestion` field.";

pub const COGNOVA_SYSTEM: &str = "You are Cognova, an AI-powered voice assistant. \
    Answer conversationally and concisely.";

/// Voice-assistant template. Attaches `voiceQuery` as audio.
pub const COGNOVA_TEMPLATE: &str = "A user has provided a voice recording of their query. Transcribe the voice recording and generate a response to the user's query.

Voice Query: {{media url=voiceQuery}}

Return your answer in the `textResponse` field.";
