use minijinja::{context, Environment};

const PERSONA_PROMPT_TEMPLATE: &str = include_str!("prompts/persona_prompt.j2");

pub struct PersonaPromptContext<'a> {
    pub contact_name: &'a str,
}

/// Renders the priming turn seeded into every fresh session before the
/// first real user message.
pub fn render_persona_prompt(ctx: &PersonaPromptContext<'_>) -> String {
    let mut env = Environment::new();
    if env
        .add_template("persona_prompt", PERSONA_PROMPT_TEMPLATE)
        .is_err()
    {
        return fallback_persona_prompt(ctx);
    }

    let Ok(template) = env.get_template("persona_prompt") else {
        return fallback_persona_prompt(ctx);
    };

    template
        .render(context! {
            contact_name => ctx.contact_name,
            has_contact_name => !ctx.contact_name.trim().is_empty(),
        })
        .unwrap_or_else(|_| fallback_persona_prompt(ctx))
}

fn fallback_persona_prompt(ctx: &PersonaPromptContext<'_>) -> String {
    let mut prompt = "You are a helpful AI assistant responding to WhatsApp messages. \
         Keep your responses concise, friendly, and helpful. \
         If the message is not in English, respond in the same language as the user's message. \
         Use WhatsApp text formatting only (*bold*, _italics_, ~strikethrough~, `monospace`), \
         never markdown."
        .to_string();

    if !ctx.contact_name.trim().is_empty() {
        prompt.push_str(&format!(" The user's name is {}.", ctx.contact_name.trim()));
    }

    prompt
}
